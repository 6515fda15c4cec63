use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, Event, Signal};
use crate::commit::CommitCoordinator;
use crate::config::{ClientConfig, RebalanceProtocol};
use crate::dispatch::{DispatchMode, EventFan};
use crate::engine::{EngineAdapter, NativeEngine};
use crate::error::{ClientError, ErrorCode};
use crate::rebalance::{RebalanceHandler, RebalanceMachine, RebalanceOp};
use crate::types::{Message, Offset, TopicPartition};

struct ConsumerInner {
    adapter: EngineAdapter,
    classifier: StdMutex<Classifier>,
    machine: AsyncMutex<RebalanceMachine>,
    /// Next offset to read per partition, fed by the consumed stream.
    positions: StdMutex<HashMap<(String, i32), i64>>,
    /// Last known (low, high) watermarks per partition.
    watermarks: StdMutex<HashMap<(String, i32), (i64, i64)>>,
    subscription: StdMutex<Vec<String>>,
    handler: StdMutex<Option<Arc<dyn RebalanceHandler>>>,
    commits: CommitCoordinator,
    fan: EventFan,
    protocol: RebalanceProtocol,
    autocommit: bool,
    request_timeout: Duration,
    pusher: StdMutex<Option<JoinHandle<()>>>,
}

/// Consumer-group member handle. Cheap to clone; all clones share one
/// engine handle and one assignment. Commits and metadata queries are
/// safe from any task; membership transitions run on the poll path.
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Clone for Consumer {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Consumer {
    pub fn new(
        config: &ClientConfig,
        engine: Arc<dyn NativeEngine>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        config.require("group.id")?;

        let mode = if config.get_bool("events.channel.enable", false) {
            DispatchMode::Push
        } else {
            DispatchMode::Pull
        };
        let capacity = config.get_count("events.channel.size", 1000);
        let protocol = config.rebalance_protocol();

        let inner = Arc::new(ConsumerInner {
            adapter: EngineAdapter::new(engine),
            classifier: StdMutex::new(Classifier::new()),
            machine: AsyncMutex::new(RebalanceMachine::new(protocol)),
            positions: StdMutex::new(HashMap::new()),
            watermarks: StdMutex::new(HashMap::new()),
            subscription: StdMutex::new(Vec::new()),
            handler: StdMutex::new(None),
            commits: CommitCoordinator::new(),
            fan: EventFan::new(mode, capacity),
            protocol,
            autocommit: config.get_bool("enable.auto.commit", true),
            request_timeout: config.get_millis("request.timeout.ms", 30_000),
            pusher: StdMutex::new(None),
        });
        let consumer = Self { inner };

        if mode == DispatchMode::Push {
            let pusher = consumer.clone();
            let handle = tokio::spawn(async move {
                pusher.run_push_loop().await;
            });
            *consumer.inner.pusher.lock().expect("pusher lock") = Some(handle);
        }

        Ok(consumer)
    }

    async fn run_push_loop(&self) {
        info!("starting event channel loop");
        loop {
            if self.inner.adapter.is_closed() {
                break;
            }
            if let Some(event) = self.drive_once(Duration::from_millis(100)).await {
                self.inner.fan.emit(event).await;
            }
        }
        // Closing the sender lets the application drain what is already
        // buffered before the channel reports closed.
        self.inner.fan.close();
        debug!("event channel loop exiting");
    }

    /// Drive one engine poll and route the classified signal. Internal
    /// signals resolve in place; application-visible events come back.
    async fn drive_once(&self, timeout: Duration) -> Option<Event> {
        let raw = self.inner.adapter.poll(timeout).await?;
        let signal = {
            let mut classifier = self.inner.classifier.lock().expect("classifier lock");
            classifier.classify(raw)
        };
        self.route(signal).await
    }

    async fn route(&self, signal: Signal) -> Option<Event> {
        match signal {
            Signal::Consumed(message) => {
                let key = (message.topic.clone(), message.partition);
                {
                    let mut positions = self.inner.positions.lock().expect("positions lock");
                    positions.insert(key.clone(), message.offset + 1);
                }
                {
                    let mut marks = self.inner.watermarks.lock().expect("watermarks lock");
                    let entry = marks.entry(key).or_insert((0, 0));
                    entry.1 = entry.1.max(message.offset + 1);
                }
                Some(Event::Message(message))
            }
            Signal::Assigned(set) => Some(self.rebalance(RebalanceOp::Assigned, set).await),
            Signal::Revoked(set) => Some(self.rebalance(RebalanceOp::Revoked, set).await),
            Signal::Lost(set) => Some(self.rebalance(RebalanceOp::Lost, set).await),
            Signal::LogEnd(partition) => Some(Event::PartitionEof(partition)),
            Signal::CommitAck {
                token,
                offsets,
                error,
            } => {
                let generation = self.inner.machine.lock().await.generation();
                self.inner.commits.resolve(token, offsets, error, generation)
            }
            Signal::Delivery { .. } | Signal::AdminReply { .. } => {
                debug!("ignoring producer/admin signal on consumer poll path");
                None
            }
            Signal::Failure(err) => Some(Event::Error(err)),
        }
    }

    async fn rebalance(&self, op: RebalanceOp, partitions: Vec<TopicPartition>) -> Event {
        let handler = self.inner.handler.lock().expect("handler lock").clone();
        let positions = self.inner.positions.lock().expect("positions lock").clone();
        let mut machine = self.inner.machine.lock().await;
        let event = if self.inner.autocommit {
            machine
                .handle(
                    op,
                    partitions,
                    handler,
                    &self.inner.adapter,
                    Some((&self.inner.commits, &positions)),
                )
                .await
        } else {
            machine
                .handle(op, partitions, handler, &self.inner.adapter, None)
                .await
        };
        // Positions for partitions we no longer own must not leak into
        // a later commit-current call.
        let mut tracked = self.inner.positions.lock().expect("positions lock");
        tracked.retain(|(topic, partition), _| machine.is_assigned(topic, *partition));
        event
    }

    /// Join the group for these topics. The handler, when given, owns
    /// the assignment decisions for every subsequent rebalance.
    pub fn subscribe(
        &self,
        topics: &[&str],
        handler: Option<Arc<dyn RebalanceHandler>>,
    ) -> Result<(), ClientError> {
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        *self.inner.handler.lock().expect("handler lock") = handler;
        self.inner.adapter.subscribe(&topics)?;
        *self.inner.subscription.lock().expect("subscription lock") = topics;
        Ok(())
    }

    pub fn subscription(&self) -> Vec<String> {
        self.inner.subscription.lock().expect("subscription lock").clone()
    }

    /// Leave the subscribed topics. When autocommit is on, the tracked
    /// positions for the live assignment are committed (enqueued ahead
    /// of the group leave) before the assignment is dropped.
    pub async fn unsubscribe(&self) -> Result<(), ClientError> {
        let mut machine = self.inner.machine.lock().await;
        self.autocommit_assignment(&machine);
        machine.manual_unassign(&self.inner.adapter)?;
        drop(machine);

        self.inner.positions.lock().expect("positions lock").clear();
        self.inner.subscription.lock().expect("subscription lock").clear();
        self.inner.adapter.unsubscribe()
    }

    fn autocommit_assignment(&self, machine: &RebalanceMachine) {
        if !self.inner.autocommit || machine.assignment_lost() {
            return;
        }
        let positions = self.inner.positions.lock().expect("positions lock");
        let offsets: Vec<TopicPartition> = machine
            .assignment()
            .into_iter()
            .filter_map(|partition| {
                positions.get(&partition.index()).map(|next| {
                    TopicPartition::with_offset(
                        partition.topic.clone(),
                        partition.partition,
                        Offset::At(*next),
                    )
                })
            })
            .collect();
        drop(positions);
        if offsets.is_empty() {
            return;
        }
        if let Err(err) = self
            .inner
            .commits
            .commit_untracked(&self.inner.adapter, offsets)
        {
            warn!(%err, "final autocommit failed");
        }
    }

    /// Manually replace the assignment, outside group management.
    pub async fn assign(&self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        let mut machine = self.inner.machine.lock().await;
        machine.manual_assign(partitions, &self.inner.adapter)
    }

    pub async fn incremental_assign(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        let mut machine = self.inner.machine.lock().await;
        machine.manual_incremental_assign(partitions, &self.inner.adapter)
    }

    pub async fn incremental_unassign(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<(), ClientError> {
        let mut machine = self.inner.machine.lock().await;
        machine.manual_incremental_unassign(partitions, &self.inner.adapter)
    }

    pub async fn unassign(&self) -> Result<(), ClientError> {
        let mut machine = self.inner.machine.lock().await;
        machine.manual_unassign(&self.inner.adapter)
    }

    pub async fn assignment(&self) -> Vec<TopicPartition> {
        self.inner.machine.lock().await.assignment()
    }

    /// Whether the current assignment was lost (session expiry) rather
    /// than voluntarily handed back.
    pub async fn assignment_lost(&self) -> bool {
        self.inner.machine.lock().await.assignment_lost()
    }

    pub fn rebalance_protocol(&self) -> RebalanceProtocol {
        self.inner.protocol
    }

    /// Move fetch positions. Returns one result per requested partition;
    /// the next message read from a successfully seeked partition is the
    /// one at the requested offset.
    pub fn seek_partitions(
        &self,
        partitions: Vec<TopicPartition>,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        let results = self.inner.adapter.seek(&partitions)?;
        let mut tracked = self.inner.positions.lock().expect("positions lock");
        for result in &results {
            if result.error.is_none() {
                if let Offset::At(offset) = result.offset {
                    tracked.insert(result.index(), offset);
                }
            }
        }
        Ok(results)
    }

    /// Pull-mode event read: drives the engine until an application
    /// event surfaces or the timeout elapses.
    pub async fn poll(&self, timeout: Duration) -> Result<Option<Event>, ClientError> {
        if self.inner.adapter.is_closed() {
            return Err(ClientError::closed());
        }
        if self.inner.fan.mode() == DispatchMode::Push {
            return Err(ClientError::new(
                ErrorCode::InvalidState,
                "events channel is enabled; range over events() instead of polling",
            ));
        }
        if let Some(event) = self.inner.fan.pop_backlog() {
            return Ok(Some(event));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            let remaining = if deadline > now {
                deadline - now
            } else {
                Duration::ZERO
            };
            if let Some(event) = self.drive_once(remaining).await {
                return Ok(Some(event));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Push-mode event channel. Take-once.
    pub fn events(&self) -> Result<mpsc::Receiver<Event>, ClientError> {
        self.inner.fan.take_receiver()
    }

    /// Commit the tracked consumption positions of the current
    /// assignment.
    pub async fn commit(&self) -> Result<Vec<TopicPartition>, ClientError> {
        let offsets: Vec<TopicPartition> = {
            let machine = self.inner.machine.lock().await;
            let positions = self.inner.positions.lock().expect("positions lock");
            machine
                .assignment()
                .into_iter()
                .filter_map(|partition| {
                    positions.get(&partition.index()).map(|next| {
                        TopicPartition::with_offset(
                            partition.topic.clone(),
                            partition.partition,
                            Offset::At(*next),
                        )
                    })
                })
                .collect()
        };
        if offsets.is_empty() {
            return Ok(Vec::new());
        }
        self.commit_offsets(offsets).await
    }

    /// Commit the position after one consumed message.
    pub async fn commit_message(
        &self,
        message: &Message,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        self.commit_offsets(vec![message.next_offset()]).await
    }

    /// Commit explicit offsets. Offsets outside the live assignment are
    /// rejected here and never reach the engine.
    pub async fn commit_offsets(
        &self,
        offsets: Vec<TopicPartition>,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        let generation = {
            let machine = self.inner.machine.lock().await;
            CommitCoordinator::validate_against_assignment(&offsets, |partition| {
                machine.contains(partition)
            })?;
            machine.generation()
        };
        let (token, rx) = self.inner.commits.register(generation);
        self.inner
            .commits
            .enqueue(&self.inner.adapter, token, offsets)?;
        self.await_commit(rx).await
    }

    async fn await_commit(
        &self,
        mut rx: oneshot::Receiver<crate::commit::CommitOutcome>,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        match self.inner.fan.mode() {
            // The push loop resolves the ack.
            DispatchMode::Push => {
                match tokio::time::timeout(self.inner.request_timeout, rx).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => Err(ClientError::from(ErrorCode::Cancelled)),
                    Err(_) => Err(ClientError::deadline_exceeded()),
                }
            }
            // Nothing else may be polling: drive the engine here and
            // park anything that surfaces for the next poll() call.
            DispatchMode::Pull => {
                let deadline = Instant::now() + self.inner.request_timeout;
                loop {
                    match rx.try_recv() {
                        Ok(outcome) => return outcome,
                        Err(oneshot::error::TryRecvError::Empty) => {}
                        Err(oneshot::error::TryRecvError::Closed) => {
                            return Err(ClientError::from(ErrorCode::Cancelled));
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(ClientError::deadline_exceeded());
                    }
                    if let Some(event) = self.drive_once(Duration::from_millis(20)).await {
                        self.inner.fan.emit(event).await;
                    }
                }
            }
        }
    }

    /// The offsets last committed for these partitions, from the group
    /// coordinator.
    pub async fn committed(
        &self,
        partitions: Vec<TopicPartition>,
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        self.inner.adapter.committed(&partitions, timeout).await
    }

    /// Ask the engine for the live low/high watermarks of a partition.
    pub async fn query_watermark_offsets(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<(i64, i64), ClientError> {
        let marks = self
            .inner
            .adapter
            .query_watermarks(topic, partition, timeout)
            .await?;
        self.inner
            .watermarks
            .lock()
            .expect("watermarks lock")
            .insert((topic.to_string(), partition), marks);
        Ok(marks)
    }

    /// Last known watermarks from the fetch path, without a round trip.
    pub fn watermark_offsets(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<(i64, i64), ClientError> {
        self.inner
            .watermarks
            .lock()
            .expect("watermarks lock")
            .get(&(topic.to_string(), partition))
            .copied()
            .ok_or_else(|| {
                ClientError::new(
                    ErrorCode::UnknownPartition,
                    format!("no cached watermarks for {topic}[{partition}]"),
                )
            })
    }

    /// Earliest offsets whose timestamps are at or past the requested
    /// per-partition timestamps (given in the offset slot).
    pub async fn offsets_for_times(
        &self,
        partitions: Vec<TopicPartition>,
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        self.inner
            .adapter
            .offsets_for_times(&partitions, timeout)
            .await
    }

    /// Next offset to be read per requested partition, from local
    /// consumption tracking.
    pub fn position(&self, partitions: &[TopicPartition]) -> Vec<TopicPartition> {
        let tracked = self.inner.positions.lock().expect("positions lock");
        partitions
            .iter()
            .map(|partition| {
                let offset = tracked
                    .get(&partition.index())
                    .map(|next| Offset::At(*next))
                    .unwrap_or(Offset::Invalid);
                TopicPartition::with_offset(partition.topic.clone(), partition.partition, offset)
            })
            .collect()
    }

    pub fn pause(&self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        self.inner.adapter.pause(partitions)
    }

    pub fn resume(&self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        self.inner.adapter.resume(partitions)
    }

    /// Close the consumer: final autocommit, leave the group, release
    /// the engine handle, close the event channel.
    pub async fn close(&self) -> Result<(), ClientError> {
        {
            let mut machine = self.inner.machine.lock().await;
            self.autocommit_assignment(&machine);
            machine.reset();
        }
        // Let the engine work through what is already enqueued (the
        // final commit in particular) before the handle goes away.
        self.inner.adapter.flush(Duration::from_millis(500)).await;
        self.inner.adapter.unsubscribe().ok();
        self.inner.adapter.close();

        let handle = self.inner.pusher.lock().expect("pusher lock").take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
        self.inner.commits.fail_all();
        Ok(())
    }
}
