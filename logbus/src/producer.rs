use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::classifier::{Classifier, Signal};
use crate::config::ClientConfig;
use crate::delivery::DeliveryTracker;
use crate::engine::{EngineAdapter, NativeEngine, ProduceRequest};
use crate::error::{ClientError, ErrorCode};
use crate::types::{DeliveryReport, Record};

/// Resolves to the delivery report of a single produced record. Per-call
/// slot with capacity one: the report is buffered even if this future is
/// awaited late, and an abandoned future never blocks other deliveries.
pub struct DeliveryFuture<O> {
    rx: oneshot::Receiver<DeliveryReport<O>>,
}

impl<O> Future for DeliveryFuture<O> {
    type Output = Result<DeliveryReport<O>, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|r| r.map_err(|_| ClientError::from(ErrorCode::Cancelled)))
    }
}

struct ProducerInner<O: Send + Sync + 'static> {
    adapter: EngineAdapter,
    tracker: DeliveryTracker<O>,
    classifier: Mutex<Classifier>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Producer handle. Cheap to clone; all clones share one engine handle.
/// Safe to call from any number of tasks concurrently.
pub struct Producer<O: Send + Sync + 'static = ()> {
    inner: Arc<ProducerInner<O>>,
}

impl<O: Send + Sync + 'static> Clone for Producer<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: Send + Sync + 'static> Producer<O> {
    pub fn new(
        config: &ClientConfig,
        engine: Arc<dyn NativeEngine>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let shared_capacity = config.get_count("queue.buffering.max.messages", 100_000);
        let inner = Arc::new(ProducerInner {
            adapter: EngineAdapter::new(engine),
            tracker: DeliveryTracker::new(shared_capacity),
            classifier: Mutex::new(Classifier::new()),
            poller: Mutex::new(None),
        });

        // Delivery events are resolved by a dedicated poll task so
        // producers work without the caller driving anything.
        let poll_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            run_poller(poll_inner).await;
        });
        *inner.poller.lock().expect("poller lock") = Some(handle);

        Ok(Self { inner })
    }

    /// Enqueue one record; its delivery report goes to the shared
    /// channel (see [`Producer::deliveries`]). Local failures hand the
    /// record back so the caller keeps the opaque.
    pub fn produce(&self, record: Record<O>) -> Result<(), (ClientError, Record<O>)> {
        self.produce_inner(record, None).map(|_| ())
    }

    /// Enqueue one record and get a future for its delivery report.
    pub fn produce_with_report(
        &self,
        record: Record<O>,
    ) -> Result<DeliveryFuture<O>, (ClientError, Record<O>)> {
        let (tx, rx) = oneshot::channel();
        self.produce_inner(record, Some(tx))?;
        Ok(DeliveryFuture { rx })
    }

    fn produce_inner(
        &self,
        record: Record<O>,
        slot: Option<oneshot::Sender<DeliveryReport<O>>>,
    ) -> Result<(), (ClientError, Record<O>)> {
        if record.topic.is_empty() {
            return Err((
                ClientError::new(ErrorCode::InvalidMessage, "record has no topic"),
                record,
            ));
        }
        if self.inner.adapter.is_closed() {
            return Err((ClientError::closed(), record));
        }

        let Record {
            topic,
            partition,
            key,
            value,
            headers,
            timestamp,
            opaque,
        } = record;
        // Register before enqueueing so a fast delivery event can never
        // race the registration.
        let token = self
            .inner
            .tracker
            .register(&topic, partition, opaque, slot);
        let request = ProduceRequest {
            token,
            topic,
            partition,
            key,
            value,
            headers,
            timestamp,
        };

        match self.inner.adapter.enqueue_produce(request) {
            Ok(()) => Ok(()),
            Err((err, request)) => {
                // The engine rejected the enqueue, so no delivery event
                // exists for this token.
                let opaque = self
                    .inner
                    .tracker
                    .unregister(token)
                    .expect("registration present until enqueue outcome");
                Err((
                    err,
                    Record {
                        topic: request.topic,
                        partition: request.partition,
                        key: request.key,
                        value: request.value,
                        headers: request.headers,
                        timestamp: request.timestamp,
                        opaque,
                    },
                ))
            }
        }
    }

    /// The shared delivery channel for records produced without a
    /// per-call report. Single consumer; the second take fails.
    pub fn deliveries(&self) -> Result<mpsc::Receiver<DeliveryReport<O>>, ClientError> {
        self.inner.tracker.take_shared_receiver().ok_or_else(|| {
            ClientError::new(ErrorCode::InvalidState, "delivery channel already taken")
        })
    }

    /// A channel to feed records through; a forwarding task drains it
    /// into `produce`, backing off while the outbound queue is full.
    pub fn produce_channel(&self, capacity: usize) -> mpsc::Sender<Record<O>> {
        let (tx, mut rx) = mpsc::channel::<Record<O>>(capacity.max(1));
        let producer = self.clone();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let mut pending = Some(record);
                while let Some(record) = pending.take() {
                    match producer.produce(record) {
                        Ok(()) => {}
                        Err((err, record)) if err.code() == ErrorCode::QueueFull => {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            pending = Some(record);
                        }
                        Err((err, record)) => {
                            warn!(%err, topic = %record.topic, "dropping record from produce channel");
                        }
                    }
                }
            }
        });
        tx
    }

    /// Records still queued or awaiting their delivery event.
    pub fn len(&self) -> usize {
        self.inner.adapter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every enqueued record has a terminal delivery report,
    /// or the timeout elapses. Returns the count still pending; zero
    /// means fully drained.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let outstanding = self.inner.tracker.outstanding();
            if outstanding == 0 {
                return 0;
            }
            let now = Instant::now();
            if now >= deadline {
                return outstanding;
            }
            let step = (deadline - now).min(Duration::from_millis(50));
            self.inner.adapter.flush(step).await;
            // Give the poll task a beat to resolve delivery events.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Close the producer. Records still in flight get a terminal
    /// `ClientClosed` report; call `flush` first for a clean shutdown.
    pub async fn close(&self) {
        self.inner.adapter.close();
        let handle = self.inner.poller.lock().expect("poller lock").take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
        self.inner.tracker.fail_all(ErrorCode::ClientClosed).await;
    }
}

async fn run_poller<O: Send + Sync + 'static>(inner: Arc<ProducerInner<O>>) {
    loop {
        if inner.adapter.is_closed() {
            break;
        }
        let Some(raw) = inner.adapter.poll(Duration::from_millis(100)).await else {
            continue;
        };
        let signal = {
            let mut classifier = inner.classifier.lock().expect("classifier lock");
            classifier.classify(raw)
        };
        match signal {
            Signal::Delivery {
                token,
                partition,
                timestamp,
            } => inner.tracker.resolve(token, partition, timestamp).await,
            Signal::Failure(err) => warn!(%err, "engine failure event"),
            other => debug!(?other, "ignoring non-producer signal"),
        }
    }
    debug!("producer poll task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCluster;
    use crate::types::Offset;

    fn setup() -> (MockCluster, Producer<&'static str>) {
        let cluster = MockCluster::new();
        cluster.create_topic("events", 2);
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", cluster.bootstrap_servers());
        let engine = cluster.engine(&config);
        let producer = Producer::new(&config, engine).unwrap();
        (cluster, producer)
    }

    #[tokio::test]
    async fn per_call_report_carries_offset_and_opaque() {
        let (_cluster, producer) = setup();

        let report = producer
            .produce_with_report(Record::to("events").partition(0).value("a").opaque("Op0"))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(report.opaque, "Op0");
        assert_eq!(report.partition.offset, Offset::At(0));
        assert!(report.error().is_none());
        producer.close().await;
    }

    #[tokio::test]
    async fn produce_without_topic_is_rejected_locally() {
        let (_cluster, producer) = setup();
        let (err, record) = producer
            .produce(Record::to("").value("x").opaque("keep"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
        assert_eq!(record.opaque, "keep");
        producer.close().await;
    }

    #[tokio::test]
    async fn queue_full_is_synchronous_and_returns_the_record() {
        let (cluster, producer) = setup();
        cluster.set_produce_queue_limit(0);

        let (err, record) = producer
            .produce(Record::to("events").partition(0).value("x").opaque("Op0"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::QueueFull);
        assert_eq!(record.opaque, "Op0");
        assert_eq!(producer.len(), 0);
        producer.close().await;
    }

    #[tokio::test]
    async fn close_fails_outstanding_records() {
        let (cluster, producer) = setup();
        cluster.hold_deliveries(true);

        let future = producer
            .produce_with_report(Record::to("events").partition(0).value("x").opaque("Op0"))
            .unwrap();
        producer.close().await;

        let report = future.await.unwrap();
        assert_eq!(report.error(), Some(ErrorCode::ClientClosed));
    }
}
