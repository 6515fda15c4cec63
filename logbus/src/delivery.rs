use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ErrorCode;
use crate::metrics_consts::{DELIVERIES_OUTSTANDING, DELIVERY_REPORTS};
use crate::types::{DeliveryReport, Offset, Timestamp, TopicPartition};

/// A registered produce awaiting its terminal delivery event.
struct PendingDelivery<O> {
    topic: String,
    partition: i32,
    opaque: O,
    /// Per-call slot; `None` funnels the report into the shared channel.
    slot: Option<oneshot::Sender<DeliveryReport<O>>>,
}

/// Correlates produced records with their delivery outcomes. Caller
/// threads register before enqueueing; the poll path resolves. Every
/// successfully enqueued record gets exactly one terminal report, even
/// on error or close.
pub(crate) struct DeliveryTracker<O> {
    records: DashMap<u64, PendingDelivery<O>>,
    next_token: AtomicU64,
    shared_tx: mpsc::Sender<DeliveryReport<O>>,
    shared_rx: Mutex<Option<mpsc::Receiver<DeliveryReport<O>>>>,
}

impl<O> DeliveryTracker<O> {
    pub(crate) fn new(shared_capacity: usize) -> Self {
        let (shared_tx, shared_rx) = mpsc::channel(shared_capacity);
        Self {
            records: DashMap::new(),
            next_token: AtomicU64::new(1),
            shared_tx,
            shared_rx: Mutex::new(Some(shared_rx)),
        }
    }

    /// Register a record before it is enqueued, keyed by a fresh token.
    pub(crate) fn register(
        &self,
        topic: &str,
        partition: i32,
        opaque: O,
        slot: Option<oneshot::Sender<DeliveryReport<O>>>,
    ) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.records.insert(
            token,
            PendingDelivery {
                topic: topic.to_string(),
                partition,
                opaque,
                slot,
            },
        );
        metrics::gauge!(DELIVERIES_OUTSTANDING).set(self.records.len() as f64);
        token
    }

    /// Drop a registration whose enqueue failed locally, handing the
    /// opaque back to the caller. No report is emitted: a record the
    /// engine never accepted has no delivery outcome.
    pub(crate) fn unregister(&self, token: u64) -> Option<O> {
        let removed = self.records.remove(&token).map(|(_, p)| p.opaque);
        metrics::gauge!(DELIVERIES_OUTSTANDING).set(self.records.len() as f64);
        removed
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.records.len()
    }

    /// Resolve a delivery event. Per-call slots are capacity one and
    /// never block: an undrained caller cannot stall other deliveries.
    /// Shared-channel sends apply backpressure to the poll loop only.
    pub(crate) async fn resolve(
        &self,
        token: u64,
        partition: TopicPartition,
        timestamp: Timestamp,
    ) {
        let Some((_, pending)) = self.records.remove(&token) else {
            debug!(token, "delivery event for unknown record");
            return;
        };
        metrics::gauge!(DELIVERIES_OUTSTANDING).set(self.records.len() as f64);
        metrics::counter!(DELIVERY_REPORTS).increment(1);

        let report = DeliveryReport {
            partition,
            timestamp,
            opaque: pending.opaque,
        };
        match pending.slot {
            Some(slot) => {
                // Receiver may be gone; the outcome is still terminal.
                slot.send(report).ok();
            }
            None => {
                self.shared_tx.send(report).await.ok();
            }
        }
    }

    /// Force-resolve everything still outstanding, e.g. when the client
    /// closes with records in flight.
    pub(crate) async fn fail_all(&self, code: ErrorCode) {
        let tokens: Vec<u64> = self.records.iter().map(|entry| *entry.key()).collect();
        for token in tokens {
            let Some((_, pending)) = self.records.remove(&token) else {
                continue;
            };
            let mut partition = TopicPartition::new(pending.topic, pending.partition);
            partition.offset = Offset::Invalid;
            partition.error = Some(code);
            let report = DeliveryReport {
                partition,
                timestamp: Timestamp::NotAvailable,
                opaque: pending.opaque,
            };
            match pending.slot {
                Some(slot) => {
                    slot.send(report).ok();
                }
                None => {
                    self.shared_tx.send(report).await.ok();
                }
            }
        }
        metrics::gauge!(DELIVERIES_OUTSTANDING).set(0.0);
    }

    /// Hand out the shared delivery channel. Single consumer; the second
    /// take returns `None`.
    pub(crate) fn take_shared_receiver(&self) -> Option<mpsc::Receiver<DeliveryReport<O>>> {
        self.shared_rx.lock().expect("delivery receiver lock").take()
    }
}
