//! Shared setup for the integration tests.

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Route library logs through the test harness writer. Safe to call
/// from every test; only the first call installs the subscriber.
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init()
    });
}
