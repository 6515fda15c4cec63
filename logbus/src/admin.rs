use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::admin_types::{
    AclBinding, AclBindingFilter, AclResult, AdminOptions, AdminReply, AdminRequest,
    ClusterDescription, ConfigResource, ConfigResourceResult, ConsumerGroupDescription,
    ConsumerGroupListing, DeleteAclsResult, DeleteRecordsResult, GroupResult, ListOffsetsResult,
    Metadata, NewPartitions, OffsetSpec, ScramResult, TopicDescription, TopicResult,
    TopicSpecification, UserScramCredentialAlteration, UserScramCredentialsDescription,
};
use crate::classifier::{Classifier, Signal};
use crate::config::ClientConfig;
use crate::engine::{EngineAdapter, NativeEngine};
use crate::error::{ClientError, ErrorCode};
use crate::metrics_consts::{ADMIN_DEADLINE_EXPIRED, ADMIN_REQUESTS, ADMIN_RESULTS_DISCARDED};
use crate::types::TopicPartition;

struct AdminInner {
    adapter: EngineAdapter,
    classifier: Mutex<Classifier>,
    tickets: DashMap<u64, oneshot::Sender<AdminReply>>,
    next_token: AtomicU64,
    default_timeout: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Administrative client: topic, partition, config, ACL, group, offset
/// and credential management. Every call is deadline-bound; on expiry
/// the wait is abandoned locally and a late engine result is discarded.
pub struct AdminClient {
    inner: Arc<AdminInner>,
}

impl Clone for AdminClient {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl AdminClient {
    pub fn new(
        config: &ClientConfig,
        engine: Arc<dyn NativeEngine>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let inner = Arc::new(AdminInner {
            adapter: EngineAdapter::new(engine),
            classifier: Mutex::new(Classifier::new()),
            tickets: DashMap::new(),
            next_token: AtomicU64::new(1),
            default_timeout: config.get_millis("request.timeout.ms", 30_000),
            poller: Mutex::new(None),
        });

        // Results are matched to waiters from a shared poll task.
        let poll_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            run_poller(poll_inner).await;
        });
        *inner.poller.lock().expect("poller lock") = Some(handle);

        Ok(Self { inner })
    }

    async fn request(
        &self,
        request: AdminRequest,
        options: &AdminOptions,
    ) -> Result<AdminReply, ClientError> {
        let timeout = options.request_timeout.unwrap_or(self.inner.default_timeout);
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.tickets.insert(token, tx);
        metrics::counter!(ADMIN_REQUESTS).increment(1);

        if let Err(err) = self.inner.adapter.enqueue_admin(token, request) {
            self.inner.tickets.remove(&token);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(AdminReply::Error(err))) => Err(err),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::from(ErrorCode::Cancelled)),
            Err(_) => {
                // Fire-and-forget on timeout: drop the ticket so a late
                // result is discarded, make no attempt at remote abort.
                self.inner.tickets.remove(&token);
                metrics::counter!(ADMIN_DEADLINE_EXPIRED).increment(1);
                Err(ClientError::deadline_exceeded())
            }
        }
    }

    pub async fn create_topics(
        &self,
        topics: Vec<TopicSpecification>,
        options: AdminOptions,
    ) -> Result<Vec<TopicResult>, ClientError> {
        match self
            .request(
                AdminRequest::CreateTopics {
                    topics,
                    validate_only: options.validate_only,
                },
                &options,
            )
            .await?
        {
            AdminReply::Topics(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn delete_topics(
        &self,
        topics: Vec<String>,
        options: AdminOptions,
    ) -> Result<Vec<TopicResult>, ClientError> {
        match self
            .request(AdminRequest::DeleteTopics { topics }, &options)
            .await?
        {
            AdminReply::Topics(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn create_partitions(
        &self,
        partitions: Vec<NewPartitions>,
        options: AdminOptions,
    ) -> Result<Vec<TopicResult>, ClientError> {
        match self
            .request(
                AdminRequest::CreatePartitions {
                    partitions,
                    validate_only: options.validate_only,
                },
                &options,
            )
            .await?
        {
            AdminReply::Topics(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn describe_topics(
        &self,
        topics: Vec<String>,
        options: AdminOptions,
    ) -> Result<Vec<TopicDescription>, ClientError> {
        match self
            .request(
                AdminRequest::DescribeTopics {
                    topics,
                    include_authorized_operations: options.include_authorized_operations,
                },
                &options,
            )
            .await?
        {
            AdminReply::TopicDescriptions(descriptions) => Ok(descriptions),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn describe_cluster(
        &self,
        options: AdminOptions,
    ) -> Result<ClusterDescription, ClientError> {
        match self
            .request(
                AdminRequest::DescribeCluster {
                    include_authorized_operations: options.include_authorized_operations,
                },
                &options,
            )
            .await?
        {
            AdminReply::Cluster(description) => Ok(description),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn cluster_id(&self, options: AdminOptions) -> Result<Option<String>, ClientError> {
        Ok(self.describe_cluster(options).await?.cluster_id)
    }

    pub async fn controller_id(&self, options: AdminOptions) -> Result<i32, ClientError> {
        Ok(self.metadata(None, options).await?.controller_id)
    }

    /// Cluster metadata, for all topics or one topic.
    pub async fn metadata(
        &self,
        topic: Option<&str>,
        options: AdminOptions,
    ) -> Result<Metadata, ClientError> {
        match self
            .request(
                AdminRequest::FetchMetadata {
                    topic: topic.map(str::to_string),
                },
                &options,
            )
            .await?
        {
            AdminReply::Metadata(metadata) => Ok(metadata),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn describe_configs(
        &self,
        resources: Vec<ConfigResource>,
        options: AdminOptions,
    ) -> Result<Vec<ConfigResourceResult>, ClientError> {
        match self
            .request(AdminRequest::DescribeConfigs { resources }, &options)
            .await?
        {
            AdminReply::Configs(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn alter_configs(
        &self,
        resources: Vec<ConfigResource>,
        options: AdminOptions,
    ) -> Result<Vec<ConfigResourceResult>, ClientError> {
        match self
            .request(
                AdminRequest::AlterConfigs {
                    resources,
                    validate_only: options.validate_only,
                },
                &options,
            )
            .await?
        {
            AdminReply::Configs(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn create_acls(
        &self,
        bindings: Vec<AclBinding>,
        options: AdminOptions,
    ) -> Result<Vec<AclResult>, ClientError> {
        match self
            .request(AdminRequest::CreateAcls { bindings }, &options)
            .await?
        {
            AdminReply::CreatedAcls(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn describe_acls(
        &self,
        filter: AclBindingFilter,
        options: AdminOptions,
    ) -> Result<Vec<AclBinding>, ClientError> {
        match self
            .request(AdminRequest::DescribeAcls { filter }, &options)
            .await?
        {
            AdminReply::Acls(bindings) => Ok(bindings),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn delete_acls(
        &self,
        filters: Vec<AclBindingFilter>,
        options: AdminOptions,
    ) -> Result<Vec<DeleteAclsResult>, ClientError> {
        match self
            .request(AdminRequest::DeleteAcls { filters }, &options)
            .await?
        {
            AdminReply::DeletedAcls(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn list_consumer_groups(
        &self,
        options: AdminOptions,
    ) -> Result<Vec<ConsumerGroupListing>, ClientError> {
        match self
            .request(
                AdminRequest::ListGroups {
                    states: options.match_states.clone(),
                    types: options.match_types.clone(),
                },
                &options,
            )
            .await?
        {
            AdminReply::GroupListings(listings) => Ok(listings),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn describe_consumer_groups(
        &self,
        groups: Vec<String>,
        options: AdminOptions,
    ) -> Result<Vec<ConsumerGroupDescription>, ClientError> {
        match self
            .request(
                AdminRequest::DescribeGroups {
                    groups,
                    include_authorized_operations: options.include_authorized_operations,
                },
                &options,
            )
            .await?
        {
            AdminReply::GroupDescriptions(descriptions) => Ok(descriptions),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn delete_consumer_groups(
        &self,
        groups: Vec<String>,
        options: AdminOptions,
    ) -> Result<Vec<GroupResult>, ClientError> {
        match self
            .request(AdminRequest::DeleteGroups { groups }, &options)
            .await?
        {
            AdminReply::Groups(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    /// Last committed offset per partition for a group. `None` lists
    /// every partition the group has offsets for.
    pub async fn list_consumer_group_offsets(
        &self,
        group: impl Into<String>,
        partitions: Option<Vec<TopicPartition>>,
        options: AdminOptions,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        match self
            .request(
                AdminRequest::ListGroupOffsets {
                    group: group.into(),
                    partitions,
                },
                &options,
            )
            .await?
        {
            AdminReply::GroupOffsets(offsets) => Ok(offsets),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn alter_consumer_group_offsets(
        &self,
        group: impl Into<String>,
        offsets: Vec<TopicPartition>,
        options: AdminOptions,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        match self
            .request(
                AdminRequest::AlterGroupOffsets {
                    group: group.into(),
                    offsets,
                },
                &options,
            )
            .await?
        {
            AdminReply::GroupOffsets(offsets) => Ok(offsets),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn delete_consumer_group_offsets(
        &self,
        group: impl Into<String>,
        partitions: Vec<TopicPartition>,
        options: AdminOptions,
    ) -> Result<Vec<TopicPartition>, ClientError> {
        match self
            .request(
                AdminRequest::DeleteGroupOffsets {
                    group: group.into(),
                    partitions,
                },
                &options,
            )
            .await?
        {
            AdminReply::GroupOffsets(offsets) => Ok(offsets),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn list_offsets(
        &self,
        requests: Vec<(TopicPartition, OffsetSpec)>,
        options: AdminOptions,
    ) -> Result<Vec<ListOffsetsResult>, ClientError> {
        match self
            .request(
                AdminRequest::ListOffsets {
                    requests,
                    isolation_level: options.isolation_level,
                },
                &options,
            )
            .await?
        {
            AdminReply::ListedOffsets(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    /// Delete all records before the given per-partition offsets.
    pub async fn delete_records(
        &self,
        offsets: Vec<TopicPartition>,
        options: AdminOptions,
    ) -> Result<Vec<DeleteRecordsResult>, ClientError> {
        match self
            .request(AdminRequest::DeleteRecords { offsets }, &options)
            .await?
        {
            AdminReply::DeletedRecords(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn describe_user_scram_credentials(
        &self,
        users: Vec<String>,
        options: AdminOptions,
    ) -> Result<Vec<UserScramCredentialsDescription>, ClientError> {
        match self
            .request(AdminRequest::DescribeScramCredentials { users }, &options)
            .await?
        {
            AdminReply::ScramDescriptions(descriptions) => Ok(descriptions),
            _ => Err(unexpected_reply()),
        }
    }

    pub async fn alter_user_scram_credentials(
        &self,
        alterations: Vec<UserScramCredentialAlteration>,
        options: AdminOptions,
    ) -> Result<Vec<ScramResult>, ClientError> {
        match self
            .request(AdminRequest::AlterScramCredentials { alterations }, &options)
            .await?
        {
            AdminReply::ScramResults(results) => Ok(results),
            _ => Err(unexpected_reply()),
        }
    }

    /// Close the client. Callers still waiting observe a cancelled
    /// result.
    pub async fn close(&self) {
        self.inner.adapter.close();
        let handle = self.inner.poller.lock().expect("poller lock").take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
        self.inner.tickets.clear();
    }
}

fn unexpected_reply() -> ClientError {
    ClientError::new(ErrorCode::Engine, "unexpected admin reply shape")
}

async fn run_poller(inner: Arc<AdminInner>) {
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
            Signal::AdminReply { token, reply } => {
                match inner.tickets.remove(&token) {
                    Some((_, tx)) => {
                        // Receiver may have timed out in the meantime;
                        // the result is then dropped on the floor.
                        tx.send(reply).ok();
                    }
                    None => {
                        debug!(token, "discarding admin result with no waiting ticket");
                        metrics::counter!(ADMIN_RESULTS_DISCARDED).increment(1);
                    }
                }
            }
            Signal::Failure(err) => warn!(%err, "engine failure event"),
            other => debug!(?other, "ignoring non-admin signal"),
        }
    }
    debug!("admin poll task exiting");
}
