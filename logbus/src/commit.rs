use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::classifier::Event;
use crate::engine::{CommitRequest, EngineAdapter};
use crate::error::{ClientError, ErrorCode};
use crate::metrics_consts::{COMMIT_REQUESTS, STALE_COMMIT_ACKS};
use crate::types::TopicPartition;

pub(crate) type CommitOutcome = Result<Vec<TopicPartition>, ClientError>;

struct CommitWaiter {
    generation: i64,
    tx: oneshot::Sender<CommitOutcome>,
}

/// Funnels the commit entry points into one validated primitive and
/// pairs commit acks back up with their callers. Requests are tagged
/// with the rebalance generation they were issued under; an ack that
/// lands after the generation moved on resolves as stale instead of
/// silently succeeding against the new membership.
pub(crate) struct CommitCoordinator {
    waiters: DashMap<u64, CommitWaiter>,
    next_token: AtomicU64,
}

impl CommitCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            waiters: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Reject any offset outside the live assignment before it reaches
    /// the engine.
    pub(crate) fn validate_against_assignment(
        offsets: &[TopicPartition],
        contains: impl Fn(&TopicPartition) -> bool,
    ) -> Result<(), ClientError> {
        for partition in offsets {
            if !contains(partition) {
                return Err(ClientError::new(
                    ErrorCode::UnknownPartition,
                    format!("{partition} is not part of the current assignment"),
                ));
            }
        }
        Ok(())
    }

    /// Park a waiter for a synchronous commit issued under `generation`.
    pub(crate) fn register(
        &self,
        generation: i64,
    ) -> (u64, oneshot::Receiver<CommitOutcome>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(token, CommitWaiter { generation, tx });
        (token, rx)
    }

    pub(crate) fn enqueue(
        &self,
        adapter: &EngineAdapter,
        token: u64,
        offsets: Vec<TopicPartition>,
    ) -> Result<(), ClientError> {
        metrics::counter!(COMMIT_REQUESTS).increment(1);
        if let Err(err) = adapter.enqueue_commit(CommitRequest { token, offsets }) {
            self.waiters.remove(&token);
            return Err(err);
        }
        Ok(())
    }

    /// Fire-and-observe commit with no parked waiter: the ack surfaces
    /// as an `OffsetsCommitted` event. Used by the autocommit path.
    pub(crate) fn commit_untracked(
        &self,
        adapter: &EngineAdapter,
        offsets: Vec<TopicPartition>,
    ) -> Result<(), ClientError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(COMMIT_REQUESTS).increment(1);
        adapter.enqueue_commit(CommitRequest { token, offsets })
    }

    /// Resolve an ack from the poll path. Returns the event to surface
    /// when nobody was waiting on it.
    pub(crate) fn resolve(
        &self,
        token: u64,
        offsets: Vec<TopicPartition>,
        error: Option<ErrorCode>,
        current_generation: i64,
    ) -> Option<Event> {
        let Some((_, waiter)) = self.waiters.remove(&token) else {
            return Some(Event::OffsetsCommitted { offsets, error });
        };

        let outcome = if waiter.generation != current_generation {
            metrics::counter!(STALE_COMMIT_ACKS).increment(1);
            warn!(
                token,
                issued = waiter.generation,
                current = current_generation,
                "discarding commit ack from a superseded generation"
            );
            Err(ClientError::new(
                ErrorCode::StaleGeneration,
                format!(
                    "commit issued under generation {} resolved under {}",
                    waiter.generation, current_generation
                ),
            ))
        } else {
            match error {
                Some(code) => Err(ClientError::from(code)),
                None => Ok(offsets),
            }
        };

        if waiter.tx.send(outcome).is_err() {
            debug!(token, "commit waiter gave up before the ack arrived");
        }
        None
    }

    /// Drop every parked waiter, e.g. on close. Receivers observe a
    /// cancelled wait.
    pub(crate) fn fail_all(&self) {
        self.waiters.clear();
    }

    pub(crate) fn pending(&self) -> usize {
        self.waiters.len()
    }
}
