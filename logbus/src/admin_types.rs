use std::time::Duration;

use crate::error::ClientError;
use crate::types::TopicPartition;

/// A new topic to create.
#[derive(Debug, Clone)]
pub struct TopicSpecification {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i32,
    pub config: Vec<(String, String)>,
}

impl TopicSpecification {
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor,
            config: Vec::new(),
        }
    }
}

/// Per-topic outcome of a topic-level operation.
#[derive(Debug, Clone)]
pub struct TopicResult {
    pub name: String,
    pub error: Option<ClientError>,
}

/// Grow a topic to a new total partition count.
#[derive(Debug, Clone)]
pub struct NewPartitions {
    pub topic: String,
    pub new_total_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Any,
    Topic,
    Broker,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourcePatternType {
    Any,
    Match,
    Literal,
    Prefixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclOperation {
    Any,
    All,
    Read,
    Write,
    Create,
    Delete,
    Alter,
    Describe,
    ClusterAction,
    DescribeConfigs,
    AlterConfigs,
    IdempotentWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclPermissionType {
    Any,
    Allow,
    Deny,
}

/// One access-control binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclBinding {
    pub resource_type: ResourceType,
    pub name: String,
    pub pattern_type: ResourcePatternType,
    pub principal: String,
    pub host: String,
    pub operation: AclOperation,
    pub permission_type: AclPermissionType,
}

/// Filter over bindings. `None`/`Any` fields match everything.
#[derive(Debug, Clone)]
pub struct AclBindingFilter {
    pub resource_type: ResourceType,
    pub name: Option<String>,
    pub pattern_type: ResourcePatternType,
    pub principal: Option<String>,
    pub host: Option<String>,
    pub operation: AclOperation,
    pub permission_type: AclPermissionType,
}

impl AclBindingFilter {
    pub fn any() -> Self {
        Self {
            resource_type: ResourceType::Any,
            name: None,
            pattern_type: ResourcePatternType::Any,
            principal: None,
            host: None,
            operation: AclOperation::Any,
            permission_type: AclPermissionType::Any,
        }
    }

    pub fn matches(&self, binding: &AclBinding) -> bool {
        (self.resource_type == ResourceType::Any || self.resource_type == binding.resource_type)
            && self.name.as_deref().map_or(true, |n| n == binding.name)
            && (self.pattern_type == ResourcePatternType::Any
                || self.pattern_type == binding.pattern_type)
            && self
                .principal
                .as_deref()
                .map_or(true, |p| p == binding.principal)
            && self.host.as_deref().map_or(true, |h| h == binding.host)
            && (self.operation == AclOperation::Any || self.operation == binding.operation)
            && (self.permission_type == AclPermissionType::Any
                || self.permission_type == binding.permission_type)
    }
}

#[derive(Debug, Clone)]
pub struct AclResult {
    pub error: Option<ClientError>,
}

/// Bindings removed by one delete filter.
#[derive(Debug, Clone)]
pub struct DeleteAclsResult {
    pub bindings: Vec<AclBinding>,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSource {
    Unknown,
    Default,
    DynamicTopic,
    DynamicBroker,
    StaticBroker,
}

#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub name: String,
    pub value: Option<String>,
    pub source: ConfigSource,
    pub is_read_only: bool,
    pub is_default: bool,
    pub is_sensitive: bool,
}

impl ConfigEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            source: ConfigSource::Unknown,
            is_read_only: false,
            is_default: false,
            is_sensitive: false,
        }
    }
}

/// A configurable resource, used both as a request (which resource, and
/// for alters which entries) and as a result carrier.
#[derive(Debug, Clone)]
pub struct ConfigResource {
    pub resource_type: ResourceType,
    pub name: String,
    pub entries: Vec<ConfigEntry>,
}

#[derive(Debug, Clone)]
pub struct ConfigResourceResult {
    pub resource: ConfigResource,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerGroupState {
    Unknown,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerGroupType {
    Unknown,
    Classic,
    Consumer,
}

#[derive(Debug, Clone)]
pub struct ConsumerGroupListing {
    pub group_id: String,
    pub is_simple: bool,
    pub state: ConsumerGroupState,
    pub group_type: ConsumerGroupType,
}

#[derive(Debug, Clone)]
pub struct MemberAssignment {
    pub topic_partitions: Vec<TopicPartition>,
}

#[derive(Debug, Clone)]
pub struct MemberDescription {
    pub client_id: String,
    pub consumer_id: String,
    pub host: String,
    pub assignment: MemberAssignment,
}

#[derive(Debug, Clone)]
pub struct ConsumerGroupDescription {
    pub group_id: String,
    pub is_simple: bool,
    pub members: Vec<MemberDescription>,
    pub partition_assignor: String,
    pub state: ConsumerGroupState,
    pub coordinator: Option<Node>,
    pub authorized_operations: Vec<AclOperation>,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone)]
pub struct GroupResult {
    pub group_id: String,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClusterDescription {
    pub cluster_id: Option<String>,
    pub controller: Option<Node>,
    pub nodes: Vec<Node>,
    pub authorized_operations: Vec<AclOperation>,
}

#[derive(Debug, Clone)]
pub struct TopicPartitionInfo {
    pub partition: i32,
    pub leader: Option<Node>,
    pub replicas: Vec<Node>,
    pub isr: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct TopicDescription {
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<TopicPartitionInfo>,
    pub authorized_operations: Vec<AclOperation>,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone)]
pub struct PartitionMetadata {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub brokers: Vec<Node>,
    pub topics: Vec<TopicMetadata>,
    pub cluster_id: Option<String>,
    pub controller_id: i32,
}

/// Which offset to resolve for `list_offsets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    Earliest,
    Latest,
    ForTimestamp(i64),
}

#[derive(Debug, Clone)]
pub struct ListOffsetsResult {
    pub partition: TopicPartition,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct DeletedRecords {
    pub low_watermark: i64,
}

#[derive(Debug, Clone)]
pub struct DeleteRecordsResult {
    pub partition: TopicPartition,
    pub deleted: Option<DeletedRecords>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramMechanism {
    Unknown,
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScramCredentialInfo {
    pub mechanism: ScramMechanism,
    pub iterations: i32,
}

#[derive(Debug, Clone)]
pub struct UserScramCredentialsDescription {
    pub user: String,
    pub credentials: Vec<ScramCredentialInfo>,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone)]
pub enum UserScramCredentialAlteration {
    Upsert {
        user: String,
        info: ScramCredentialInfo,
        password: Vec<u8>,
        salt: Option<Vec<u8>>,
    },
    Delete {
        user: String,
        mechanism: ScramMechanism,
    },
}

#[derive(Debug, Clone)]
pub struct ScramResult {
    pub user: String,
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
}

/// Admin request payloads as handed to the engine. The correlation
/// token travels alongside, assigned by the correlator.
#[derive(Debug, Clone)]
pub enum AdminRequest {
    CreateTopics {
        topics: Vec<TopicSpecification>,
        validate_only: bool,
    },
    DeleteTopics {
        topics: Vec<String>,
    },
    CreatePartitions {
        partitions: Vec<NewPartitions>,
        validate_only: bool,
    },
    DescribeTopics {
        topics: Vec<String>,
        include_authorized_operations: bool,
    },
    DescribeCluster {
        include_authorized_operations: bool,
    },
    FetchMetadata {
        topic: Option<String>,
    },
    DescribeConfigs {
        resources: Vec<ConfigResource>,
    },
    AlterConfigs {
        resources: Vec<ConfigResource>,
        validate_only: bool,
    },
    CreateAcls {
        bindings: Vec<AclBinding>,
    },
    DescribeAcls {
        filter: AclBindingFilter,
    },
    DeleteAcls {
        filters: Vec<AclBindingFilter>,
    },
    ListGroups {
        states: Vec<ConsumerGroupState>,
        types: Vec<ConsumerGroupType>,
    },
    DescribeGroups {
        groups: Vec<String>,
        include_authorized_operations: bool,
    },
    DeleteGroups {
        groups: Vec<String>,
    },
    ListGroupOffsets {
        group: String,
        partitions: Option<Vec<TopicPartition>>,
    },
    AlterGroupOffsets {
        group: String,
        offsets: Vec<TopicPartition>,
    },
    DeleteGroupOffsets {
        group: String,
        partitions: Vec<TopicPartition>,
    },
    ListOffsets {
        requests: Vec<(TopicPartition, OffsetSpec)>,
        isolation_level: IsolationLevel,
    },
    DeleteRecords {
        offsets: Vec<TopicPartition>,
    },
    DescribeScramCredentials {
        users: Vec<String>,
    },
    AlterScramCredentials {
        alterations: Vec<UserScramCredentialAlteration>,
    },
}

/// Admin completion payloads coming back through the poll stream.
#[derive(Debug, Clone)]
pub enum AdminReply {
    Topics(Vec<TopicResult>),
    TopicDescriptions(Vec<TopicDescription>),
    Cluster(ClusterDescription),
    Metadata(Metadata),
    Configs(Vec<ConfigResourceResult>),
    CreatedAcls(Vec<AclResult>),
    Acls(Vec<AclBinding>),
    DeletedAcls(Vec<DeleteAclsResult>),
    GroupListings(Vec<ConsumerGroupListing>),
    GroupDescriptions(Vec<ConsumerGroupDescription>),
    Groups(Vec<GroupResult>),
    GroupOffsets(Vec<TopicPartition>),
    ListedOffsets(Vec<ListOffsetsResult>),
    DeletedRecords(Vec<DeleteRecordsResult>),
    ScramDescriptions(Vec<UserScramCredentialsDescription>),
    ScramResults(Vec<ScramResult>),
    Error(ClientError),
}

/// Per-call options shared by every admin operation.
#[derive(Debug, Clone)]
pub struct AdminOptions {
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) validate_only: bool,
    pub(crate) include_authorized_operations: bool,
    pub(crate) isolation_level: IsolationLevel,
    pub(crate) match_states: Vec<ConsumerGroupState>,
    pub(crate) match_types: Vec<ConsumerGroupType>,
}

impl Default for AdminOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            validate_only: false,
            include_authorized_operations: false,
            isolation_level: IsolationLevel::ReadUncommitted,
            match_states: Vec::new(),
            match_types: Vec::new(),
        }
    }
}

impl AdminOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall deadline for the call, overriding the client default.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Validate the request broker-side without applying it.
    pub fn with_validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    pub fn with_include_authorized_operations(mut self, include: bool) -> Self {
        self.include_authorized_operations = include;
        self
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Restrict group listings to these states.
    pub fn with_match_states(mut self, states: Vec<ConsumerGroupState>) -> Self {
        self.match_states = states;
        self
    }

    /// Restrict group listings to these group types.
    pub fn with_match_types(mut self, types: Vec<ConsumerGroupType>) -> Self {
        self.match_types = types;
        self
    }
}
