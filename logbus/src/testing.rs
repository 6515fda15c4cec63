//! In-process mock engine for tests.
//!
//! [`MockCluster`] plays the broker side: shared topic logs, group
//! offsets, ACLs, configs and SCRAM credentials, handing out a
//! [`NativeEngine`] per client. Test-only control knobs (queue limits,
//! held deliveries, rebalance injection, an unresponsive admin path)
//! drive the failure modes the library has to survive.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::admin_types::{
    AclBinding, AclOperation, AclResult, AdminReply, AdminRequest, ClusterDescription,
    ConfigEntry, ConfigResource, ConfigResourceResult, ConfigSource, ConsumerGroupDescription,
    ConsumerGroupListing, ConsumerGroupState, ConsumerGroupType, DeleteAclsResult,
    DeleteRecordsResult, DeletedRecords, GroupResult, ListOffsetsResult, Metadata, Node,
    OffsetSpec, PartitionMetadata, ResourceType, ScramCredentialInfo, ScramResult,
    TopicDescription, TopicMetadata, TopicPartitionInfo, TopicResult,
    UserScramCredentialAlteration, UserScramCredentialsDescription,
};
use crate::config::ClientConfig;
use crate::engine::{CommitRequest, NativeEngine, ProduceRequest, RawEvent};
use crate::error::{ClientError, ErrorCode};
use crate::types::{Header, Message, Offset, Timestamp, TopicPartition, PARTITION_ANY};

struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    headers: Vec<Header>,
    timestamp: i64,
}

#[derive(Default)]
struct PartitionLog {
    low_watermark: i64,
    records: Vec<StoredRecord>,
}

impl PartitionLog {
    fn high(&self) -> i64 {
        self.records.len() as i64
    }
}

#[derive(Default)]
struct ClusterState {
    topics: HashMap<String, Vec<PartitionLog>>,
    /// (group, topic, partition) -> next offset to read.
    group_offsets: HashMap<(String, String, i32), i64>,
    known_groups: HashSet<String>,
    acls: Vec<AclBinding>,
    configs: HashMap<(ResourceType, String), Vec<ConfigEntry>>,
    scram: HashMap<String, Vec<ScramCredentialInfo>>,
    produce_queue_limit: Option<usize>,
    hold_deliveries: bool,
    admin_unresponsive: bool,
    admin_latency: Duration,
}

/// Per-client event queue. Deliveries count as outstanding from accept
/// until the client polls them out.
struct Mailbox {
    queue: Mutex<VecDeque<RawEvent>>,
    held: Mutex<Vec<RawEvent>>,
    outstanding: AtomicUsize,
    closed: AtomicBool,
    notify: Notify,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            held: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: RawEvent) {
        self.queue.lock().expect("mailbox lock").push_back(event);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<RawEvent> {
        let event = self.queue.lock().expect("mailbox lock").pop_front();
        if matches!(event, Some(RawEvent::Delivery { .. })) {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct Member {
    group: Option<String>,
    mailbox: Arc<Mailbox>,
}

struct MockShared {
    state: Mutex<ClusterState>,
    members: Mutex<Vec<Member>>,
}

/// An in-memory stand-in for the native engine's broker side. One
/// cluster serves any number of producer, consumer and admin clients;
/// every client created through [`MockCluster::engine`] shares its
/// topics, offsets and ACLs.
pub struct MockCluster {
    shared: Arc<MockShared>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MockShared {
                state: Mutex::new(ClusterState::default()),
                members: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn bootstrap_servers(&self) -> String {
        "mock://localhost:9092".to_string()
    }

    pub fn create_topic(&self, name: &str, partitions: i32) {
        let mut state = self.shared.state.lock().expect("cluster lock");
        state
            .topics
            .entry(name.to_string())
            .or_insert_with(|| new_logs(partitions));
    }

    /// Build an engine handle for one client, configured the way the
    /// native engine would be.
    pub fn engine(&self, config: &ClientConfig) -> Arc<dyn NativeEngine> {
        let mailbox = Arc::new(Mailbox::new());
        let group = config.get("group.id").map(str::to_string);
        self.shared
            .members
            .lock()
            .expect("members lock")
            .push(Member {
                group: group.clone(),
                mailbox: Arc::clone(&mailbox),
            });
        Arc::new(MockEngine {
            shared: Arc::clone(&self.shared),
            mailbox,
            group,
            offset_reset: config
                .get("auto.offset.reset")
                .unwrap_or("latest")
                .to_string(),
            emit_eof: config.get_bool("enable.partition.eof", false),
            fetch: Mutex::new(FetchState::default()),
        })
    }

    /// Next offset the group would read for a partition, `None` when
    /// nothing was ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.shared.state.lock().expect("cluster lock");
        state
            .group_offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Cap the produce queue; zero makes every produce fail `QueueFull`.
    pub fn set_produce_queue_limit(&self, limit: usize) {
        self.shared
            .state
            .lock()
            .expect("cluster lock")
            .produce_queue_limit = Some(limit);
    }

    /// Withhold delivery events so records stay in flight. Turning the
    /// hold off releases everything withheld so far.
    pub fn hold_deliveries(&self, hold: bool) {
        self.shared.state.lock().expect("cluster lock").hold_deliveries = hold;
        if hold {
            return;
        }
        for member in self.shared.members.lock().expect("members lock").iter() {
            let held: Vec<RawEvent> =
                member.mailbox.held.lock().expect("held lock").drain(..).collect();
            for event in held {
                member.mailbox.push(event);
            }
        }
    }

    /// Swallow admin requests so callers run into their deadlines.
    pub fn set_admin_unresponsive(&self, unresponsive: bool) {
        self.shared
            .state
            .lock()
            .expect("cluster lock")
            .admin_unresponsive = unresponsive;
    }

    /// Delay admin completions without dropping them.
    pub fn set_admin_latency(&self, latency: Duration) {
        self.shared.state.lock().expect("cluster lock").admin_latency = latency;
    }

    pub fn inject_assign(&self, group: &str, partitions: Vec<TopicPartition>) {
        self.inject(group, |set| RawEvent::GroupAssign(set), partitions);
    }

    pub fn inject_revoke(&self, group: &str, partitions: Vec<TopicPartition>) {
        self.inject(group, |set| RawEvent::GroupRevoke(set), partitions);
    }

    pub fn inject_lost(&self, group: &str, partitions: Vec<TopicPartition>) {
        self.inject(group, |set| RawEvent::GroupLost(set), partitions);
    }

    fn inject(
        &self,
        group: &str,
        build: impl Fn(Vec<TopicPartition>) -> RawEvent,
        partitions: Vec<TopicPartition>,
    ) {
        for member in self.shared.members.lock().expect("members lock").iter() {
            if member.group.as_deref() == Some(group) && !member.mailbox.is_closed() {
                member.mailbox.push(build(partitions.clone()));
            }
        }
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct FetchState {
    assignment: Vec<(String, i32)>,
    positions: HashMap<(String, i32), i64>,
    paused: HashSet<(String, i32)>,
    eof_sent: HashSet<(String, i32)>,
    cursor: usize,
}

struct MockEngine {
    shared: Arc<MockShared>,
    mailbox: Arc<Mailbox>,
    group: Option<String>,
    offset_reset: String,
    emit_eof: bool,
    fetch: Mutex<FetchState>,
}

impl MockEngine {
    fn try_fetch(&self) -> Option<RawEvent> {
        let mut fetch = self.fetch.lock().expect("fetch lock");
        if fetch.assignment.is_empty() {
            return None;
        }
        let state = self.shared.state.lock().expect("cluster lock");
        let len = fetch.assignment.len();
        for step in 0..len {
            let index = (fetch.cursor + step) % len;
            let (topic, partition) = fetch.assignment[index].clone();
            let key = (topic.clone(), partition);
            if fetch.paused.contains(&key) {
                continue;
            }
            let Some(log) = state
                .topics
                .get(&topic)
                .and_then(|p| p.get(partition as usize))
            else {
                continue;
            };
            let pos = fetch
                .positions
                .get(&key)
                .copied()
                .unwrap_or(0)
                .max(log.low_watermark);
            if pos < log.high() {
                let record = &log.records[pos as usize];
                let message = Message {
                    topic,
                    partition,
                    offset: pos,
                    key: record.key.clone(),
                    value: record.value.clone(),
                    headers: record.headers.clone(),
                    timestamp: Timestamp::CreateTime(record.timestamp),
                    leader_epoch: None,
                };
                fetch.positions.insert(key.clone(), pos + 1);
                fetch.eof_sent.remove(&key);
                fetch.cursor = (index + 1) % len;
                return Some(RawEvent::Record(message));
            }
            if self.emit_eof && !fetch.eof_sent.contains(&key) {
                fetch.eof_sent.insert(key);
                fetch.cursor = (index + 1) % len;
                return Some(RawEvent::LogEnd(TopicPartition::with_offset(
                    topic,
                    partition,
                    Offset::At(log.high()),
                )));
            }
        }
        None
    }

    fn initial_position(&self, state: &ClusterState, partition: &TopicPartition) -> i64 {
        let log = state
            .topics
            .get(&partition.topic)
            .and_then(|p| p.get(partition.partition as usize));
        match partition.offset {
            Offset::At(offset) => return offset,
            Offset::Beginning => return log.map(|l| l.low_watermark).unwrap_or(0),
            Offset::End => return log.map(PartitionLog::high).unwrap_or(0),
            Offset::Stored | Offset::Invalid => {}
        }
        if let Some(group) = &self.group {
            let key = (group.clone(), partition.topic.clone(), partition.partition);
            if let Some(next) = state.group_offsets.get(&key) {
                return *next;
            }
        }
        match (self.offset_reset.as_str(), log) {
            ("earliest", Some(log)) => log.low_watermark,
            (_, Some(log)) => log.high(),
            _ => 0,
        }
    }

    fn apply_admin(&self, request: AdminRequest) -> AdminReply {
        let mut state = self.shared.state.lock().expect("cluster lock");
        match request {
            AdminRequest::CreateTopics {
                topics,
                validate_only,
            } => AdminReply::Topics(
                topics
                    .into_iter()
                    .map(|spec| {
                        if spec.name.is_empty() || spec.num_partitions <= 0 {
                            return TopicResult {
                                name: spec.name,
                                error: Some(ClientError::new(
                                    ErrorCode::InvalidArgument,
                                    "invalid topic specification",
                                )),
                            };
                        }
                        if state.topics.contains_key(&spec.name) {
                            return TopicResult {
                                name: spec.name,
                                error: Some(ClientError::from(ErrorCode::TopicAlreadyExists)),
                            };
                        }
                        if !validate_only {
                            state
                                .topics
                                .insert(spec.name.clone(), new_logs(spec.num_partitions));
                            if !spec.config.is_empty() {
                                let entries = spec
                                    .config
                                    .iter()
                                    .map(|(name, value)| {
                                        let mut entry = ConfigEntry::new(name.clone(), value.clone());
                                        entry.source = ConfigSource::DynamicTopic;
                                        entry
                                    })
                                    .collect();
                                state
                                    .configs
                                    .insert((ResourceType::Topic, spec.name.clone()), entries);
                            }
                        }
                        TopicResult {
                            name: spec.name,
                            error: None,
                        }
                    })
                    .collect(),
            ),
            AdminRequest::DeleteTopics { topics } => AdminReply::Topics(
                topics
                    .into_iter()
                    .map(|name| {
                        if state.topics.remove(&name).is_some() {
                            state.configs.remove(&(ResourceType::Topic, name.clone()));
                            TopicResult { name, error: None }
                        } else {
                            TopicResult {
                                name,
                                error: Some(ClientError::from(ErrorCode::UnknownTopic)),
                            }
                        }
                    })
                    .collect(),
            ),
            AdminRequest::CreatePartitions {
                partitions,
                validate_only,
            } => AdminReply::Topics(
                partitions
                    .into_iter()
                    .map(|request| match state.topics.get_mut(&request.topic) {
                        None => TopicResult {
                            name: request.topic,
                            error: Some(ClientError::from(ErrorCode::UnknownTopic)),
                        },
                        Some(logs) if (request.new_total_count as usize) < logs.len() => {
                            TopicResult {
                                name: request.topic,
                                error: Some(ClientError::new(
                                    ErrorCode::InvalidArgument,
                                    "partition count can only grow",
                                )),
                            }
                        }
                        Some(logs) => {
                            if !validate_only {
                                while logs.len() < request.new_total_count as usize {
                                    logs.push(PartitionLog::default());
                                }
                            }
                            TopicResult {
                                name: request.topic,
                                error: None,
                            }
                        }
                    })
                    .collect(),
            ),
            AdminRequest::DescribeTopics {
                topics,
                include_authorized_operations,
            } => AdminReply::TopicDescriptions(
                topics
                    .into_iter()
                    .map(|name| match state.topics.get(&name) {
                        Some(logs) => TopicDescription {
                            name,
                            is_internal: false,
                            partitions: (0..logs.len())
                                .map(|index| TopicPartitionInfo {
                                    partition: index as i32,
                                    leader: Some(broker()),
                                    replicas: vec![broker()],
                                    isr: vec![broker()],
                                })
                                .collect(),
                            authorized_operations: authorized_ops(include_authorized_operations),
                            error: None,
                        },
                        None => TopicDescription {
                            name,
                            is_internal: false,
                            partitions: Vec::new(),
                            authorized_operations: Vec::new(),
                            error: Some(ClientError::from(ErrorCode::UnknownTopic)),
                        },
                    })
                    .collect(),
            ),
            AdminRequest::DescribeCluster {
                include_authorized_operations,
            } => AdminReply::Cluster(ClusterDescription {
                cluster_id: Some("mock-cluster".to_string()),
                controller: Some(broker()),
                nodes: vec![broker()],
                authorized_operations: authorized_ops(include_authorized_operations),
            }),
            AdminRequest::FetchMetadata { topic } => {
                let describe = |name: &str, logs: &[PartitionLog]| TopicMetadata {
                    name: name.to_string(),
                    partitions: (0..logs.len())
                        .map(|index| PartitionMetadata {
                            id: index as i32,
                            leader: 1,
                            replicas: vec![1],
                            isr: vec![1],
                        })
                        .collect(),
                    error: None,
                };
                let topics = match topic {
                    Some(name) => match state.topics.get(&name) {
                        Some(logs) => vec![describe(&name, logs)],
                        None => vec![TopicMetadata {
                            name,
                            partitions: Vec::new(),
                            error: Some(ClientError::from(ErrorCode::UnknownTopic)),
                        }],
                    },
                    None => {
                        let mut all: Vec<TopicMetadata> = state
                            .topics
                            .iter()
                            .map(|(name, logs)| describe(name, logs))
                            .collect();
                        all.sort_by(|a, b| a.name.cmp(&b.name));
                        all
                    }
                };
                AdminReply::Metadata(Metadata {
                    brokers: vec![broker()],
                    topics,
                    cluster_id: Some("mock-cluster".to_string()),
                    controller_id: 1,
                })
            }
            AdminRequest::DescribeConfigs { resources } => AdminReply::Configs(
                resources
                    .into_iter()
                    .map(|resource| {
                        let entries = state
                            .configs
                            .get(&(resource.resource_type, resource.name.clone()))
                            .cloned()
                            .unwrap_or_default();
                        ConfigResourceResult {
                            resource: ConfigResource {
                                resource_type: resource.resource_type,
                                name: resource.name,
                                entries,
                            },
                            error: None,
                        }
                    })
                    .collect(),
            ),
            AdminRequest::AlterConfigs {
                resources,
                validate_only,
            } => AdminReply::Configs(
                resources
                    .into_iter()
                    .map(|mut resource| {
                        let source = match resource.resource_type {
                            ResourceType::Broker => ConfigSource::DynamicBroker,
                            _ => ConfigSource::DynamicTopic,
                        };
                        for entry in &mut resource.entries {
                            entry.source = source;
                        }
                        if !validate_only {
                            state.configs.insert(
                                (resource.resource_type, resource.name.clone()),
                                resource.entries.clone(),
                            );
                        }
                        ConfigResourceResult {
                            resource,
                            error: None,
                        }
                    })
                    .collect(),
            ),
            AdminRequest::CreateAcls { bindings } => AdminReply::CreatedAcls(
                bindings
                    .into_iter()
                    .map(|binding| {
                        // Re-creating an existing binding succeeds and
                        // leaves a single entry behind.
                        if !state.acls.contains(&binding) {
                            state.acls.push(binding);
                        }
                        AclResult { error: None }
                    })
                    .collect(),
            ),
            AdminRequest::DescribeAcls { filter } => AdminReply::Acls(
                state
                    .acls
                    .iter()
                    .filter(|binding| filter.matches(binding))
                    .cloned()
                    .collect(),
            ),
            AdminRequest::DeleteAcls { filters } => AdminReply::DeletedAcls(
                filters
                    .into_iter()
                    .map(|filter| {
                        let (removed, kept): (Vec<AclBinding>, Vec<AclBinding>) = state
                            .acls
                            .drain(..)
                            .partition(|binding| filter.matches(binding));
                        state.acls = kept;
                        DeleteAclsResult {
                            bindings: removed,
                            error: None,
                        }
                    })
                    .collect(),
            ),
            AdminRequest::ListGroups { states, types } => {
                let active = self.active_groups();
                let mut groups: Vec<String> = state.known_groups.iter().cloned().collect();
                groups.sort();
                AdminReply::GroupListings(
                    groups
                        .into_iter()
                        .map(|group_id| {
                            let group_state = if active.contains(&group_id) {
                                ConsumerGroupState::Stable
                            } else {
                                ConsumerGroupState::Empty
                            };
                            ConsumerGroupListing {
                                group_id,
                                is_simple: false,
                                state: group_state,
                                group_type: ConsumerGroupType::Classic,
                            }
                        })
                        .filter(|listing| states.is_empty() || states.contains(&listing.state))
                        .filter(|listing| {
                            types.is_empty() || types.contains(&listing.group_type)
                        })
                        .collect(),
                )
            }
            AdminRequest::DescribeGroups {
                groups,
                include_authorized_operations,
            } => {
                let active = self.active_groups();
                AdminReply::GroupDescriptions(
                    groups
                        .into_iter()
                        .map(|group_id| {
                            if !state.known_groups.contains(&group_id) {
                                return ConsumerGroupDescription {
                                    group_id,
                                    is_simple: false,
                                    members: Vec::new(),
                                    partition_assignor: String::new(),
                                    state: ConsumerGroupState::Dead,
                                    coordinator: None,
                                    authorized_operations: Vec::new(),
                                    error: Some(ClientError::from(ErrorCode::UnknownGroup)),
                                };
                            }
                            let group_state = if active.contains(&group_id) {
                                ConsumerGroupState::Stable
                            } else {
                                ConsumerGroupState::Empty
                            };
                            ConsumerGroupDescription {
                                group_id,
                                is_simple: false,
                                members: Vec::new(),
                                partition_assignor: "range".to_string(),
                                state: group_state,
                                coordinator: Some(broker()),
                                authorized_operations: authorized_ops(
                                    include_authorized_operations,
                                ),
                                error: None,
                            }
                        })
                        .collect(),
                )
            }
            AdminRequest::DeleteGroups { groups } => AdminReply::Groups(
                groups
                    .into_iter()
                    .map(|group_id| {
                        if state.known_groups.remove(&group_id) {
                            state.group_offsets.retain(|(group, _, _), _| *group != group_id);
                            GroupResult {
                                group_id,
                                error: None,
                            }
                        } else {
                            GroupResult {
                                group_id,
                                error: Some(ClientError::from(ErrorCode::UnknownGroup)),
                            }
                        }
                    })
                    .collect(),
            ),
            AdminRequest::ListGroupOffsets { group, partitions } => {
                let offsets = match partitions {
                    Some(partitions) => partitions
                        .into_iter()
                        .map(|mut partition| {
                            partition.offset = state
                                .group_offsets
                                .get(&(group.clone(), partition.topic.clone(), partition.partition))
                                .map(|next| Offset::At(*next))
                                .unwrap_or(Offset::Invalid);
                            partition
                        })
                        .collect(),
                    None => {
                        let mut all: Vec<TopicPartition> = state
                            .group_offsets
                            .iter()
                            .filter(|((owner, _, _), _)| *owner == group)
                            .map(|((_, topic, partition), next)| {
                                TopicPartition::with_offset(
                                    topic.clone(),
                                    *partition,
                                    Offset::At(*next),
                                )
                            })
                            .collect();
                        all.sort_by(|a, b| {
                            a.topic
                                .cmp(&b.topic)
                                .then_with(|| a.partition.cmp(&b.partition))
                        });
                        all
                    }
                };
                AdminReply::GroupOffsets(offsets)
            }
            AdminRequest::AlterGroupOffsets { group, offsets } => {
                state.known_groups.insert(group.clone());
                for partition in &offsets {
                    if let Offset::At(next) = partition.offset {
                        state.group_offsets.insert(
                            (group.clone(), partition.topic.clone(), partition.partition),
                            next,
                        );
                    }
                }
                AdminReply::GroupOffsets(offsets)
            }
            AdminRequest::DeleteGroupOffsets { group, partitions } => AdminReply::GroupOffsets(
                partitions
                    .into_iter()
                    .map(|mut partition| {
                        let key =
                            (group.clone(), partition.topic.clone(), partition.partition);
                        if state.group_offsets.remove(&key).is_none() {
                            partition.error = Some(ErrorCode::NotFound);
                        }
                        partition.offset = Offset::Invalid;
                        partition
                    })
                    .collect(),
            ),
            AdminRequest::ListOffsets {
                requests,
                isolation_level: _,
            } => AdminReply::ListedOffsets(
                requests
                    .into_iter()
                    .map(|(mut partition, spec)| {
                        let Some(log) = state
                            .topics
                            .get(&partition.topic)
                            .and_then(|p| p.get(partition.partition as usize))
                        else {
                            partition.error = Some(ErrorCode::UnknownPartition);
                            return ListOffsetsResult {
                                partition,
                                timestamp: -1,
                            };
                        };
                        let (offset, timestamp) = match spec {
                            OffsetSpec::Earliest => (log.low_watermark, -1),
                            OffsetSpec::Latest => (log.high(), -1),
                            OffsetSpec::ForTimestamp(wanted) => {
                                match (log.low_watermark..log.high())
                                    .find(|&i| log.records[i as usize].timestamp >= wanted)
                                {
                                    Some(found) => {
                                        (found, log.records[found as usize].timestamp)
                                    }
                                    None => (log.high(), -1),
                                }
                            }
                        };
                        partition.offset = Offset::At(offset);
                        ListOffsetsResult {
                            partition,
                            timestamp,
                        }
                    })
                    .collect(),
            ),
            AdminRequest::DeleteRecords { offsets } => AdminReply::DeletedRecords(
                offsets
                    .into_iter()
                    .map(|mut partition| {
                        let Some(log) = state
                            .topics
                            .get_mut(&partition.topic)
                            .and_then(|p| p.get_mut(partition.partition as usize))
                        else {
                            partition.error = Some(ErrorCode::UnknownPartition);
                            return DeleteRecordsResult {
                                partition,
                                deleted: None,
                            };
                        };
                        let requested = match partition.offset {
                            Offset::At(offset) => offset,
                            Offset::End => log.high(),
                            _ => log.low_watermark,
                        };
                        log.low_watermark = requested.clamp(log.low_watermark, log.high());
                        let low_watermark = log.low_watermark;
                        DeleteRecordsResult {
                            partition,
                            deleted: Some(DeletedRecords { low_watermark }),
                        }
                    })
                    .collect(),
            ),
            AdminRequest::DescribeScramCredentials { users } => AdminReply::ScramDescriptions(
                users
                    .into_iter()
                    .map(|user| match state.scram.get(&user) {
                        Some(credentials) => UserScramCredentialsDescription {
                            user,
                            credentials: credentials.clone(),
                            error: None,
                        },
                        None => UserScramCredentialsDescription {
                            user,
                            credentials: Vec::new(),
                            error: Some(ClientError::from(ErrorCode::NotFound)),
                        },
                    })
                    .collect(),
            ),
            AdminRequest::AlterScramCredentials { alterations } => AdminReply::ScramResults(
                alterations
                    .into_iter()
                    .map(|alteration| match alteration {
                        UserScramCredentialAlteration::Upsert { user, info, .. } => {
                            let credentials = state.scram.entry(user.clone()).or_default();
                            credentials.retain(|c| c.mechanism != info.mechanism);
                            credentials.push(info);
                            ScramResult { user, error: None }
                        }
                        UserScramCredentialAlteration::Delete { user, mechanism } => {
                            match state.scram.get_mut(&user) {
                                Some(credentials) => {
                                    let before = credentials.len();
                                    credentials.retain(|c| c.mechanism != mechanism);
                                    let error = if credentials.len() == before {
                                        Some(ClientError::from(ErrorCode::NotFound))
                                    } else {
                                        None
                                    };
                                    ScramResult { user, error }
                                }
                                None => ScramResult {
                                    user,
                                    error: Some(ClientError::from(ErrorCode::NotFound)),
                                },
                            }
                        }
                    })
                    .collect(),
            ),
        }
    }

    fn active_groups(&self) -> HashSet<String> {
        self.shared
            .members
            .lock()
            .expect("members lock")
            .iter()
            .filter(|member| !member.mailbox.is_closed())
            .filter_map(|member| member.group.clone())
            .collect()
    }
}

#[async_trait]
impl NativeEngine for MockEngine {
    async fn poll(&self, timeout: Duration) -> Option<RawEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.mailbox.is_closed() {
                return None;
            }
            if let Some(event) = self.mailbox.pop() {
                return Some(event);
            }
            if let Some(event) = self.try_fetch() {
                return Some(event);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = (deadline - now).min(Duration::from_millis(5));
            tokio::select! {
                _ = self.mailbox.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn enqueue_produce(
        &self,
        request: ProduceRequest,
    ) -> Result<(), (ClientError, ProduceRequest)> {
        let mut state = self.shared.state.lock().expect("cluster lock");
        if let Some(limit) = state.produce_queue_limit {
            if self.mailbox.outstanding.load(Ordering::Acquire) >= limit {
                return Err((ClientError::from(ErrorCode::QueueFull), request));
            }
        }
        if request.topic.is_empty() {
            return Err((
                ClientError::new(ErrorCode::InvalidMessage, "record has no topic"),
                request,
            ));
        }
        let timestamp = request.timestamp.unwrap_or_else(now_millis);

        let delivery = match state.topics.get_mut(&request.topic) {
            None => failed_delivery(&request, ErrorCode::UnknownTopic),
            Some(partitions) => {
                let index = if request.partition == PARTITION_ANY {
                    pick_partition(request.key.as_deref(), partitions.len())
                } else {
                    request.partition
                };
                match partitions.get_mut(index as usize) {
                    None => failed_delivery(&request, ErrorCode::UnknownPartition),
                    Some(log) => {
                        let offset = log.high();
                        log.records.push(StoredRecord {
                            key: request.key.clone(),
                            value: request.value.clone(),
                            headers: request.headers.clone(),
                            timestamp,
                        });
                        RawEvent::Delivery {
                            token: request.token,
                            partition: TopicPartition::with_offset(
                                request.topic.clone(),
                                index,
                                Offset::At(offset),
                            ),
                            timestamp: Timestamp::CreateTime(timestamp),
                        }
                    }
                }
            }
        };

        self.mailbox.outstanding.fetch_add(1, Ordering::AcqRel);
        if state.hold_deliveries {
            self.mailbox.held.lock().expect("held lock").push(delivery);
        } else {
            self.mailbox.push(delivery);
        }
        Ok(())
    }

    fn enqueue_commit(&self, request: CommitRequest) -> Result<(), ClientError> {
        let Some(group) = &self.group else {
            return Err(ClientError::new(
                ErrorCode::InvalidArgument,
                "commit requires group.id",
            ));
        };
        {
            let mut state = self.shared.state.lock().expect("cluster lock");
            state.known_groups.insert(group.clone());
            for partition in &request.offsets {
                if let Offset::At(next) = partition.offset {
                    state.group_offsets.insert(
                        (group.clone(), partition.topic.clone(), partition.partition),
                        next,
                    );
                }
            }
        }
        self.mailbox.push(RawEvent::CommitAck {
            token: request.token,
            offsets: request.offsets,
            error: None,
        });
        Ok(())
    }

    fn enqueue_admin(&self, token: u64, request: AdminRequest) -> Result<(), ClientError> {
        let (unresponsive, latency) = {
            let state = self.shared.state.lock().expect("cluster lock");
            (state.admin_unresponsive, state.admin_latency)
        };
        if unresponsive {
            // The request never completes; the caller's deadline covers it.
            return Ok(());
        }
        let reply = self.apply_admin(request);
        if latency.is_zero() {
            self.mailbox.push(RawEvent::AdminReply { token, reply });
        } else {
            let mailbox = Arc::clone(&self.mailbox);
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                mailbox.push(RawEvent::AdminReply { token, reply });
            });
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.mailbox.outstanding.load(Ordering::Acquire)
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = self.mailbox.outstanding.load(Ordering::Acquire);
            if remaining == 0 || tokio::time::Instant::now() >= deadline {
                return remaining;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn close(&self) {
        self.mailbox.closed.store(true, Ordering::Release);
        self.mailbox.notify.notify_waiters();
    }

    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        let Some(group) = &self.group else {
            return Err(ClientError::new(
                ErrorCode::InvalidArgument,
                "subscribe requires group.id",
            ));
        };
        // Single-member groups: the subscriber is handed every partition
        // of every subscribed topic on the next poll.
        let mut assignment = Vec::new();
        {
            let mut state = self.shared.state.lock().expect("cluster lock");
            state.known_groups.insert(group.clone());
            for topic in topics {
                if let Some(partitions) = state.topics.get(topic) {
                    for index in 0..partitions.len() {
                        assignment.push(TopicPartition::new(topic.clone(), index as i32));
                    }
                }
            }
        }
        self.mailbox.push(RawEvent::GroupAssign(assignment));
        Ok(())
    }

    fn unsubscribe(&self) {}

    fn apply_assignment(&self, assignment: &[TopicPartition]) -> Result<(), ClientError> {
        let mut fetch = self.fetch.lock().expect("fetch lock");
        let state = self.shared.state.lock().expect("cluster lock");
        let next: Vec<(String, i32)> = assignment.iter().map(TopicPartition::index).collect();
        fetch.positions.retain(|key, _| next.contains(key));
        fetch.eof_sent.retain(|key| next.contains(key));
        for partition in assignment {
            let key = partition.index();
            if fetch.positions.contains_key(&key) {
                continue;
            }
            let start = self.initial_position(&state, partition);
            fetch.positions.insert(key, start);
        }
        fetch.assignment = next;
        fetch.cursor = 0;
        Ok(())
    }

    fn seek(&self, partitions: &[TopicPartition]) -> Vec<TopicPartition> {
        let mut fetch = self.fetch.lock().expect("fetch lock");
        let state = self.shared.state.lock().expect("cluster lock");
        partitions
            .iter()
            .map(|partition| {
                let mut result = partition.clone();
                let Some(log) = state
                    .topics
                    .get(&partition.topic)
                    .and_then(|p| p.get(partition.partition as usize))
                else {
                    result.error = Some(ErrorCode::UnknownPartition);
                    return result;
                };
                let target = match partition.offset {
                    Offset::At(offset) => offset,
                    Offset::Beginning => log.low_watermark,
                    Offset::End => log.high(),
                    Offset::Stored | Offset::Invalid => {
                        result.error = Some(ErrorCode::InvalidArgument);
                        return result;
                    }
                };
                if target < log.low_watermark || target > log.high() {
                    result.error = Some(ErrorCode::OffsetOutOfRange);
                    return result;
                }
                let key = partition.index();
                fetch.positions.insert(key.clone(), target);
                fetch.eof_sent.remove(&key);
                result.offset = Offset::At(target);
                result
            })
            .collect()
    }

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        let mut fetch = self.fetch.lock().expect("fetch lock");
        for partition in partitions {
            fetch.paused.insert(partition.index());
        }
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        let mut fetch = self.fetch.lock().expect("fetch lock");
        for partition in partitions {
            fetch.paused.remove(&partition.index());
        }
        Ok(())
    }

    async fn committed(
        &self,
        partitions: &[TopicPartition],
        _timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        let Some(group) = &self.group else {
            return Err(ClientError::new(
                ErrorCode::InvalidArgument,
                "committed requires group.id",
            ));
        };
        let state = self.shared.state.lock().expect("cluster lock");
        Ok(partitions
            .iter()
            .map(|partition| {
                let key = (group.clone(), partition.topic.clone(), partition.partition);
                let offset = state
                    .group_offsets
                    .get(&key)
                    .map(|next| Offset::At(*next))
                    .unwrap_or(Offset::Invalid);
                TopicPartition::with_offset(partition.topic.clone(), partition.partition, offset)
            })
            .collect())
    }

    async fn query_watermarks(
        &self,
        topic: &str,
        partition: i32,
        _timeout: Duration,
    ) -> Result<(i64, i64), ClientError> {
        let state = self.shared.state.lock().expect("cluster lock");
        state
            .topics
            .get(topic)
            .and_then(|p| p.get(partition as usize))
            .map(|log| (log.low_watermark, log.high()))
            .ok_or_else(|| {
                ClientError::new(ErrorCode::UnknownPartition, format!("{topic}[{partition}]"))
            })
    }

    async fn offsets_for_times(
        &self,
        partitions: &[TopicPartition],
        _timeout: Duration,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        let state = self.shared.state.lock().expect("cluster lock");
        Ok(partitions
            .iter()
            .map(|partition| {
                let mut result = partition.clone();
                let Some(log) = state
                    .topics
                    .get(&partition.topic)
                    .and_then(|p| p.get(partition.partition as usize))
                else {
                    result.error = Some(ErrorCode::UnknownPartition);
                    return result;
                };
                let Offset::At(wanted) = partition.offset else {
                    result.error = Some(ErrorCode::InvalidArgument);
                    return result;
                };
                result.offset = (log.low_watermark..log.high())
                    .find(|&i| log.records[i as usize].timestamp >= wanted)
                    .map(Offset::At)
                    .unwrap_or(Offset::End);
                result
            })
            .collect())
    }
}

fn new_logs(partitions: i32) -> Vec<PartitionLog> {
    (0..partitions.max(0)).map(|_| PartitionLog::default()).collect()
}

fn failed_delivery(request: &ProduceRequest, code: ErrorCode) -> RawEvent {
    let mut partition = TopicPartition::new(request.topic.clone(), request.partition);
    partition.error = Some(code);
    RawEvent::Delivery {
        token: request.token,
        partition,
        timestamp: Timestamp::NotAvailable,
    }
}

fn broker() -> Node {
    Node {
        id: 1,
        host: "localhost".to_string(),
        port: 9092,
        rack: None,
    }
}

fn authorized_ops(include: bool) -> Vec<AclOperation> {
    if include {
        vec![AclOperation::Read, AclOperation::Write, AclOperation::Describe]
    } else {
        Vec::new()
    }
}

fn pick_partition(key: Option<&[u8]>, partitions: usize) -> i32 {
    match key {
        Some(key) if !key.is_empty() && partitions > 0 => {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % partitions as u64) as i32
        }
        _ => 0,
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
