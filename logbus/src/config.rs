use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ClientError, ErrorCode};

/// Which rebalance protocol the consumer group runs under, derived from
/// `partition.assignment.strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceProtocol {
    /// No group membership (manual assignment only).
    None,
    /// Revoke everything, then reassign.
    Eager,
    /// Move only the changed partitions.
    Cooperative,
}

impl std::fmt::Display for RebalanceProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebalanceProtocol::None => write!(f, "NONE"),
            RebalanceProtocol::Eager => write!(f, "EAGER"),
            RebalanceProtocol::Cooperative => write!(f, "COOPERATIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Any,
    Bool,
    Count,
    Millis,
    Choice(&'static [&'static str]),
}

/// Recognized configuration keys. Anything outside this table is
/// rejected at client construction.
const KNOWN_KEYS: &[(&str, ValueKind)] = &[
    ("bootstrap.servers", ValueKind::Any),
    ("client.id", ValueKind::Any),
    ("group.id", ValueKind::Any),
    ("group.instance.id", ValueKind::Any),
    ("session.timeout.ms", ValueKind::Millis),
    ("heartbeat.interval.ms", ValueKind::Millis),
    ("max.poll.interval.ms", ValueKind::Millis),
    (
        "auto.offset.reset",
        ValueKind::Choice(&["earliest", "latest", "error"]),
    ),
    ("enable.auto.commit", ValueKind::Bool),
    ("auto.commit.interval.ms", ValueKind::Millis),
    (
        "partition.assignment.strategy",
        ValueKind::Choice(&["range", "roundrobin", "cooperative-sticky"]),
    ),
    ("events.channel.enable", ValueKind::Bool),
    ("events.channel.size", ValueKind::Count),
    ("enable.partition.eof", ValueKind::Bool),
    ("linger.ms", ValueKind::Millis),
    ("batch.num.messages", ValueKind::Count),
    ("message.timeout.ms", ValueKind::Millis),
    ("queue.buffering.max.messages", ValueKind::Count),
    ("request.timeout.ms", ValueKind::Millis),
    (
        "security.protocol",
        ValueKind::Choice(&["plaintext", "ssl", "sasl_plaintext", "sasl_ssl"]),
    ),
    (
        "sasl.mechanism",
        ValueKind::Choice(&["PLAIN", "SCRAM-SHA-256", "SCRAM-SHA-512"]),
    ),
    ("sasl.username", ValueKind::Any),
    ("sasl.password", ValueKind::Any),
    ("statistics.interval.ms", ValueKind::Millis),
];

/// Flat string-keyed client configuration, validated when a client is
/// built from it. Mirrors the engine's native configuration surface so
/// values pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    entries: HashMap<String, String>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Validate every entry against the recognized-keys table.
    pub fn validate(&self) -> Result<(), ClientError> {
        for (key, value) in &self.entries {
            let Some((_, kind)) = KNOWN_KEYS.iter().find(|(name, _)| name == key) else {
                return Err(ClientError::new(
                    ErrorCode::InvalidArgument,
                    format!("unrecognized configuration key {key:?}"),
                ));
            };
            let ok = match kind {
                ValueKind::Any => true,
                ValueKind::Bool => value.parse::<bool>().is_ok(),
                ValueKind::Count => value.parse::<u64>().is_ok(),
                ValueKind::Millis => value.parse::<u64>().is_ok(),
                ValueKind::Choice(options) => options.contains(&value.as_str()),
            };
            if !ok {
                return Err(ClientError::new(
                    ErrorCode::InvalidArgument,
                    format!("invalid value {value:?} for configuration key {key:?}"),
                ));
            }
        }
        if self.get("bootstrap.servers").is_none() {
            return Err(ClientError::new(
                ErrorCode::InvalidArgument,
                "bootstrap.servers is required",
            ));
        }
        Ok(())
    }

    pub(crate) fn require(&self, key: &str) -> Result<&str, ClientError> {
        self.get(key).ok_or_else(|| {
            ClientError::new(ErrorCode::InvalidArgument, format!("{key} is required"))
        })
    }

    pub(crate) fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    pub(crate) fn get_count(&self, key: &str, default: usize) -> usize {
        self.get(key)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default)
    }

    pub(crate) fn get_millis(&self, key: &str, default: u64) -> Duration {
        Duration::from_millis(
            self.get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default),
        )
    }

    pub(crate) fn rebalance_protocol(&self) -> RebalanceProtocol {
        if self.get("group.id").is_none() {
            return RebalanceProtocol::None;
        }
        match self.get("partition.assignment.strategy") {
            Some("cooperative-sticky") => RebalanceProtocol::Cooperative,
            _ => RebalanceProtocol::Eager,
        }
    }
}
