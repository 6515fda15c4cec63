use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::classifier::Event;
use crate::commit::CommitCoordinator;
use crate::config::RebalanceProtocol;
use crate::engine::EngineAdapter;
use crate::metrics_consts::REBALANCE_TRANSITIONS;
use crate::types::{Offset, TopicPartition};

/// Where the consumer stands in the group-membership protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Unassigned,
    Assigning,
    Stable,
    Revoking,
    PartiallyAssigning,
    PartiallyRevoking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RebalanceOp {
    Assigned,
    Revoked,
    Lost,
}

/// Handler for group-membership changes. Implementations receive a
/// pending-transition context whose `assign`/`incremental_assign`/
/// `unassign`/`incremental_unassign` calls are what actually commit the
/// new assignment — the state machine does not apply an assignment the
/// handler chose to withhold. The default method bodies apply the
/// protocol's standard action, so a handler that only wants
/// notifications can override a method, inspect the partitions, and
/// still call `ctx.apply_default(partitions)`.
///
/// Handlers run synchronously on the poll path: a transition is not
/// finished, and fetching does not resume on the new assignment, until
/// the method returns.
#[async_trait]
pub trait RebalanceHandler: Send + Sync {
    /// The group handed these partitions to this member.
    async fn on_assign(
        &self,
        ctx: &mut RebalanceContext<'_>,
        partitions: &[TopicPartition],
    ) -> anyhow::Result<()> {
        ctx.apply_default(partitions);
        Ok(())
    }

    /// The group is taking these partitions back. Under the eager
    /// protocol the whole live set is already gone by the time this
    /// runs; under cooperative only `partitions` were removed.
    async fn on_revoke(
        &self,
        ctx: &mut RebalanceContext<'_>,
        partitions: &[TopicPartition],
    ) -> anyhow::Result<()> {
        ctx.apply_default(partitions);
        Ok(())
    }

    /// Membership expired: the partitions are gone without a clean
    /// hand-back, and no offsets were committed for them.
    async fn on_lost(
        &self,
        ctx: &mut RebalanceContext<'_>,
        partitions: &[TopicPartition],
    ) -> anyhow::Result<()> {
        ctx.apply_default(partitions);
        Ok(())
    }
}

/// The pending transition handed to a [`RebalanceHandler`]. Mutations go
/// through this context, not through the consumer handle, so the
/// handler's re-entrant assignment calls take effect before the
/// transition completes.
pub struct RebalanceContext<'a> {
    op: RebalanceOp,
    protocol: RebalanceProtocol,
    lost: bool,
    acted: bool,
    assigned: &'a mut HashMap<(String, i32), TopicPartition>,
}

impl RebalanceContext<'_> {
    pub fn protocol(&self) -> RebalanceProtocol {
        self.protocol
    }

    /// True when this transition was forced by an expired session rather
    /// than a voluntary hand-back.
    pub fn assignment_lost(&self) -> bool {
        self.lost
    }

    pub fn assignment(&self) -> Vec<TopicPartition> {
        sorted_partitions(self.assigned)
    }

    /// Replace the assignment wholesale (eager style).
    pub fn assign(&mut self, partitions: &[TopicPartition]) {
        self.acted = true;
        self.assigned.clear();
        for partition in partitions {
            self.assigned
                .insert(partition.index(), partition.clone());
        }
    }

    /// Drop the whole assignment (eager style).
    pub fn unassign(&mut self) {
        self.acted = true;
        self.assigned.clear();
    }

    /// Add partitions without touching the rest of the set.
    pub fn incremental_assign(&mut self, partitions: &[TopicPartition]) {
        self.acted = true;
        for partition in partitions {
            self.assigned
                .insert(partition.index(), partition.clone());
        }
    }

    /// Remove exactly these partitions.
    pub fn incremental_unassign(&mut self, partitions: &[TopicPartition]) {
        self.acted = true;
        for partition in partitions {
            self.assigned.remove(&partition.index());
        }
    }

    /// The action the state machine would take without a handler.
    pub fn apply_default(&mut self, partitions: &[TopicPartition]) {
        match (self.op, self.protocol) {
            (RebalanceOp::Assigned, RebalanceProtocol::Cooperative) => {
                self.incremental_assign(partitions)
            }
            (RebalanceOp::Assigned, _) => self.assign(partitions),
            (RebalanceOp::Revoked | RebalanceOp::Lost, RebalanceProtocol::Cooperative) => {
                self.incremental_unassign(partitions)
            }
            (RebalanceOp::Revoked | RebalanceOp::Lost, _) => self.unassign(),
        }
    }
}

/// Owns the assignment set and drives assign/revoke/lost transitions,
/// eager or cooperative. Mutated only from the poll path.
pub(crate) struct RebalanceMachine {
    protocol: RebalanceProtocol,
    state: MembershipState,
    assigned: HashMap<(String, i32), TopicPartition>,
    generation: i64,
    lost: bool,
}

impl RebalanceMachine {
    pub(crate) fn new(protocol: RebalanceProtocol) -> Self {
        Self {
            protocol,
            state: MembershipState::Unassigned,
            assigned: HashMap::new(),
            generation: 0,
            lost: false,
        }
    }

    pub(crate) fn state(&self) -> MembershipState {
        self.state
    }

    pub(crate) fn generation(&self) -> i64 {
        self.generation
    }

    pub(crate) fn assignment_lost(&self) -> bool {
        self.lost
    }

    pub(crate) fn assignment(&self) -> Vec<TopicPartition> {
        sorted_partitions(&self.assigned)
    }

    pub(crate) fn contains(&self, partition: &TopicPartition) -> bool {
        self.assigned.contains_key(&partition.index())
    }

    pub(crate) fn is_assigned(&self, topic: &str, partition: i32) -> bool {
        self.assigned.contains_key(&(topic.to_string(), partition))
    }

    /// Manual (non-callback) assignment from the application: replaces
    /// the set, like an eager assign.
    pub(crate) fn manual_assign(
        &mut self,
        partitions: &[TopicPartition],
        adapter: &EngineAdapter,
    ) -> Result<(), crate::error::ClientError> {
        self.assigned.clear();
        for partition in partitions {
            self.assigned.insert(partition.index(), partition.clone());
        }
        self.lost = false;
        self.generation += 1;
        self.state = if self.assigned.is_empty() {
            MembershipState::Unassigned
        } else {
            MembershipState::Stable
        };
        adapter.apply_assignment(&self.assignment())
    }

    pub(crate) fn manual_incremental_assign(
        &mut self,
        partitions: &[TopicPartition],
        adapter: &EngineAdapter,
    ) -> Result<(), crate::error::ClientError> {
        for partition in partitions {
            self.assigned.insert(partition.index(), partition.clone());
        }
        self.lost = false;
        self.generation += 1;
        self.state = MembershipState::Stable;
        adapter.apply_assignment(&self.assignment())
    }

    pub(crate) fn manual_incremental_unassign(
        &mut self,
        partitions: &[TopicPartition],
        adapter: &EngineAdapter,
    ) -> Result<(), crate::error::ClientError> {
        for partition in partitions {
            self.assigned.remove(&partition.index());
        }
        self.state = if self.assigned.is_empty() {
            MembershipState::Unassigned
        } else {
            MembershipState::Stable
        };
        adapter.apply_assignment(&self.assignment())
    }

    pub(crate) fn manual_unassign(
        &mut self,
        adapter: &EngineAdapter,
    ) -> Result<(), crate::error::ClientError> {
        self.assigned.clear();
        self.state = MembershipState::Unassigned;
        adapter.apply_assignment(&[])
    }

    /// Drive one membership transition from a classified engine event.
    /// Returns the event to surface once the transition (autocommit,
    /// handler, engine application) has completed.
    pub(crate) async fn handle(
        &mut self,
        op: RebalanceOp,
        partitions: Vec<TopicPartition>,
        handler: Option<Arc<dyn RebalanceHandler>>,
        adapter: &EngineAdapter,
        autocommit: Option<(&CommitCoordinator, &HashMap<(String, i32), i64>)>,
    ) -> Event {
        match op {
            RebalanceOp::Assigned => {
                metrics::counter!(REBALANCE_TRANSITIONS, "op" => "assign").increment(1);
                self.state = if self.protocol == RebalanceProtocol::Cooperative
                    && self.state == MembershipState::Stable
                {
                    MembershipState::PartiallyAssigning
                } else {
                    MembershipState::Assigning
                };
                info!(
                    count = partitions.len(),
                    protocol = %self.protocol,
                    "partitions assigned"
                );

                self.run_handler(op, &partitions, handler).await;
                self.lost = false;
                self.generation += 1;
                self.state = if self.assigned.is_empty() {
                    MembershipState::Unassigned
                } else {
                    MembershipState::Stable
                };
                if let Err(err) = adapter.apply_assignment(&self.assignment()) {
                    warn!(%err, "failed to apply new assignment to engine");
                }
                Event::PartitionsAssigned(partitions)
            }
            RebalanceOp::Revoked => {
                metrics::counter!(REBALANCE_TRANSITIONS, "op" => "revoke").increment(1);
                let eager = self.protocol != RebalanceProtocol::Cooperative;
                self.state = if eager {
                    MembershipState::Revoking
                } else {
                    MembershipState::PartiallyRevoking
                };

                // Scope of the hand-back: eager revoke always means the
                // whole live set, whatever the event named.
                let scope = if eager {
                    self.assignment()
                } else {
                    partitions
                        .iter()
                        .filter(|p| self.contains(p))
                        .cloned()
                        .collect()
                };
                self.autocommit_for(&scope, adapter, autocommit);

                if eager {
                    self.assigned.clear();
                    self.generation += 1;
                } else {
                    for partition in &scope {
                        self.assigned.remove(&partition.index());
                    }
                }

                self.run_handler(op, &partitions, handler).await;
                self.finish_revoke(adapter);
                Event::PartitionsRevoked(partitions)
            }
            RebalanceOp::Lost => {
                metrics::counter!(REBALANCE_TRANSITIONS, "op" => "lost").increment(1);
                let eager = self.protocol != RebalanceProtocol::Cooperative;
                self.state = if eager {
                    MembershipState::Revoking
                } else {
                    MembershipState::PartiallyRevoking
                };
                self.lost = true;
                // Session expired: the group already moved on, so there
                // is no generation to commit against.
                debug!("skipping autocommit for lost partitions");

                if eager {
                    self.assigned.clear();
                    self.generation += 1;
                } else {
                    for partition in &partitions {
                        self.assigned.remove(&partition.index());
                    }
                }

                self.run_handler(op, &partitions, handler).await;
                self.finish_revoke(adapter);
                Event::PartitionsLost(partitions)
            }
        }
    }

    async fn run_handler(
        &mut self,
        op: RebalanceOp,
        partitions: &[TopicPartition],
        handler: Option<Arc<dyn RebalanceHandler>>,
    ) {
        let mut ctx = RebalanceContext {
            op,
            protocol: self.protocol,
            lost: self.lost,
            acted: false,
            assigned: &mut self.assigned,
        };
        match handler {
            Some(handler) => {
                let result = match op {
                    RebalanceOp::Assigned => handler.on_assign(&mut ctx, partitions).await,
                    RebalanceOp::Revoked => handler.on_revoke(&mut ctx, partitions).await,
                    RebalanceOp::Lost => handler.on_lost(&mut ctx, partitions).await,
                };
                if let Err(err) = result {
                    warn!(%err, "rebalance handler failed");
                    if !ctx.acted {
                        ctx.apply_default(partitions);
                    }
                }
            }
            None => ctx.apply_default(partitions),
        }
    }

    fn autocommit_for(
        &self,
        scope: &[TopicPartition],
        adapter: &EngineAdapter,
        autocommit: Option<(&CommitCoordinator, &HashMap<(String, i32), i64>)>,
    ) {
        let Some((coordinator, positions)) = autocommit else {
            return;
        };
        let offsets: Vec<TopicPartition> = scope
            .iter()
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
        if offsets.is_empty() {
            debug!("autocommit skipped: no consumed positions for the revoked partitions");
            return;
        }
        // Enqueued ahead of the rejoin; the ack surfaces later as an
        // OffsetsCommitted event.
        if let Err(err) = coordinator.commit_untracked(adapter, offsets) {
            warn!(%err, "autocommit before revoke failed");
        }
    }

    fn finish_revoke(&mut self, adapter: &EngineAdapter) {
        self.state = if self.assigned.is_empty() {
            MembershipState::Unassigned
        } else {
            MembershipState::Stable
        };
        if let Err(err) = adapter.apply_assignment(&self.assignment()) {
            warn!(%err, "failed to apply post-revoke assignment to engine");
        }
    }

    /// Reset to unassigned without driving handlers, e.g. on close.
    pub(crate) fn reset(&mut self) {
        self.assigned.clear();
        self.state = MembershipState::Unassigned;
    }
}

fn sorted_partitions(assigned: &HashMap<(String, i32), TopicPartition>) -> Vec<TopicPartition> {
    let mut partitions: Vec<TopicPartition> = assigned.values().cloned().collect();
    partitions.sort_by(|a, b| {
        a.topic
            .cmp(&b.topic)
            .then_with(|| a.partition.cmp(&b.partition))
    });
    partitions
}
