use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::admin_types::{AdminReply, AdminRequest};
use crate::error::{ClientError, ErrorCode};
use crate::types::{Header, Message, Timestamp, TopicPartition};

/// One produced record as handed to the engine. The `token` correlates
/// the eventual delivery event back to the tracked record; the caller
/// opaque never crosses this boundary.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub token: u64,
    pub topic: String,
    pub partition: i32,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<Header>,
    pub timestamp: Option<i64>,
}

/// An offset-commit request. Commits are asynchronous at the engine
/// level; the ack event echoes the token.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub token: u64,
    pub offsets: Vec<TopicPartition>,
}

/// Raw protocol events as emitted by the native engine's poll interface,
/// before classification.
#[derive(Debug)]
pub enum RawEvent {
    /// Terminal outcome for a produced record.
    Delivery {
        token: u64,
        partition: TopicPartition,
        timestamp: Timestamp,
    },
    /// A fetched record.
    Record(Message),
    /// Group membership handed these partitions to this member.
    GroupAssign(Vec<TopicPartition>),
    /// Group membership is taking these partitions back.
    GroupRevoke(Vec<TopicPartition>),
    /// Membership expired; these partitions are gone without a clean
    /// hand-back.
    GroupLost(Vec<TopicPartition>),
    /// Fetch position reached the end of a partition log.
    LogEnd(TopicPartition),
    /// Ack for an offset commit.
    CommitAck {
        token: u64,
        offsets: Vec<TopicPartition>,
        error: Option<ErrorCode>,
    },
    /// Completion of an admin request.
    AdminReply { token: u64, reply: AdminReply },
    /// Engine-level failure surfaced on the event stream.
    Failure { code: ErrorCode, detail: String },
    /// An event kind this layer has no mapping for; carries the native
    /// code so it is never silently dropped.
    Native { code: i32, detail: String },
}

/// The seam to the external native messaging engine. The engine owns the
/// wire protocol, broker discovery, batching, compression and retries;
/// this library only polls its event stream and enqueues requests.
///
/// `poll` blocks up to the timeout and yields at most one event; `None`
/// means timeout, never error. The enqueue calls fail synchronously with
/// local, caller-recoverable errors and have no partial side effects.
#[async_trait]
pub trait NativeEngine: Send + Sync + 'static {
    async fn poll(&self, timeout: Duration) -> Option<RawEvent>;

    fn enqueue_produce(&self, request: ProduceRequest)
        -> Result<(), (ClientError, ProduceRequest)>;

    fn enqueue_commit(&self, request: CommitRequest) -> Result<(), ClientError>;

    fn enqueue_admin(&self, token: u64, request: AdminRequest) -> Result<(), ClientError>;

    /// Number of outbound requests not yet resolved.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until the outbound queue drains or the timeout elapses.
    /// Returns the count still pending; nonzero is advisory, not an
    /// error.
    async fn flush(&self, timeout: Duration) -> usize;

    /// Release the underlying handle. Called at most once.
    fn close(&self);

    // Consumer control surface.

    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError>;

    fn unsubscribe(&self);

    /// Point the fetchers at exactly this assignment.
    fn apply_assignment(&self, assignment: &[TopicPartition]) -> Result<(), ClientError>;

    /// Move fetch positions; returns one result per requested partition
    /// with the per-partition error slot filled on failure.
    fn seek(&self, partitions: &[TopicPartition]) -> Vec<TopicPartition>;

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), ClientError>;

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), ClientError>;

    async fn committed(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError>;

    async fn query_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<(i64, i64), ClientError>;

    async fn offsets_for_times(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError>;
}

/// Wraps the engine handle with the closed-state discipline every client
/// shares: `close` is idempotent and releases the handle exactly once,
/// and every other call made afterwards fails with `ClientClosed`.
pub(crate) struct EngineAdapter {
    engine: Arc<dyn NativeEngine>,
    closed: AtomicBool,
}

impl EngineAdapter {
    pub(crate) fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            engine,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::closed())
        } else {
            Ok(())
        }
    }

    pub(crate) async fn poll(&self, timeout: Duration) -> Option<RawEvent> {
        if self.is_closed() {
            return None;
        }
        self.engine.poll(timeout).await
    }

    pub(crate) fn enqueue_produce(
        &self,
        request: ProduceRequest,
    ) -> Result<(), (ClientError, ProduceRequest)> {
        if self.is_closed() {
            return Err((ClientError::closed(), request));
        }
        self.engine.enqueue_produce(request)
    }

    pub(crate) fn enqueue_commit(&self, request: CommitRequest) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.enqueue_commit(request)
    }

    pub(crate) fn enqueue_admin(
        &self,
        token: u64,
        request: AdminRequest,
    ) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.enqueue_admin(token, request)
    }

    pub(crate) fn len(&self) -> usize {
        if self.is_closed() {
            0
        } else {
            self.engine.len()
        }
    }

    pub(crate) async fn flush(&self, timeout: Duration) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.engine.flush(timeout).await
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("releasing native engine handle");
            self.engine.close();
        }
    }

    pub(crate) fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.subscribe(topics)
    }

    pub(crate) fn unsubscribe(&self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.unsubscribe();
        Ok(())
    }

    pub(crate) fn apply_assignment(
        &self,
        assignment: &[TopicPartition],
    ) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.apply_assignment(assignment)
    }

    pub(crate) fn seek(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartition>, ClientError> {
        self.ensure_open()?;
        Ok(self.engine.seek(partitions))
    }

    pub(crate) fn pause(&self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.pause(partitions)
    }

    pub(crate) fn resume(&self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.engine.resume(partitions)
    }

    pub(crate) async fn committed(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        self.ensure_open()?;
        self.engine.committed(partitions, timeout).await
    }

    pub(crate) async fn query_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<(i64, i64), ClientError> {
        self.ensure_open()?;
        self.engine.query_watermarks(topic, partition, timeout).await
    }

    pub(crate) async fn offsets_for_times(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        self.ensure_open()?;
        self.engine.offsets_for_times(partitions, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::testing::MockCluster;

    fn adapter() -> EngineAdapter {
        let cluster = MockCluster::new();
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", cluster.bootstrap_servers());
        EngineAdapter::new(cluster.engine(&config))
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fences_calls() {
        let adapter = adapter();
        assert!(!adapter.is_closed());

        adapter.close();
        adapter.close();
        assert!(adapter.is_closed());

        let err = adapter
            .enqueue_commit(CommitRequest {
                token: 1,
                offsets: vec![],
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClientClosed);
        assert!(adapter.poll(Duration::from_millis(1)).await.is_none());
        assert_eq!(adapter.len(), 0);
    }

    #[tokio::test]
    async fn produce_after_close_returns_the_request() {
        let adapter = adapter();
        adapter.close();

        let request = ProduceRequest {
            token: 7,
            topic: "events".into(),
            partition: 0,
            key: None,
            value: Some(b"payload".to_vec()),
            headers: vec![],
            timestamp: None,
        };
        let (err, returned) = adapter.enqueue_produce(request).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClientClosed);
        assert_eq!(returned.token, 7);
    }
}
