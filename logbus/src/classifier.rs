use tracing::warn;

use crate::admin_types::AdminReply;
use crate::engine::RawEvent;
use crate::error::{ClientError, ErrorCode};
use crate::metrics_consts::UNMAPPED_ENGINE_EVENTS;
use crate::types::{Message, Timestamp, TopicPartition};

/// Application-visible events, yielded by `Consumer::poll` or ranged
/// over from the push-mode event channel.
#[derive(Debug)]
pub enum Event {
    Message(Message),
    PartitionsAssigned(Vec<TopicPartition>),
    PartitionsRevoked(Vec<TopicPartition>),
    PartitionsLost(Vec<TopicPartition>),
    PartitionEof(TopicPartition),
    OffsetsCommitted {
        offsets: Vec<TopicPartition>,
        error: Option<ErrorCode>,
    },
    Error(ClientError),
}

/// Classified engine events: exactly one variant per raw event. Internal
/// variants (deliveries, commit acks, admin replies) are resolved by
/// their owning component; the rest surface as [`Event`]s.
#[derive(Debug)]
pub(crate) enum Signal {
    Delivery {
        token: u64,
        partition: TopicPartition,
        timestamp: Timestamp,
    },
    Consumed(Message),
    Assigned(Vec<TopicPartition>),
    Revoked(Vec<TopicPartition>),
    Lost(Vec<TopicPartition>),
    LogEnd(TopicPartition),
    CommitAck {
        token: u64,
        offsets: Vec<TopicPartition>,
        error: Option<ErrorCode>,
    },
    AdminReply {
        token: u64,
        reply: AdminReply,
    },
    Failure(ClientError),
}

/// Maps raw engine events to signals. Pure apart from the running event
/// sequence it is handed to maintain.
#[derive(Debug, Default)]
pub(crate) struct Classifier {
    sequence: u64,
}

impl Classifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn classify(&mut self, raw: RawEvent) -> Signal {
        self.sequence += 1;
        match raw {
            RawEvent::Delivery {
                token,
                partition,
                timestamp,
            } => Signal::Delivery {
                token,
                partition,
                timestamp,
            },
            RawEvent::Record(message) => Signal::Consumed(message),
            RawEvent::GroupAssign(partitions) => Signal::Assigned(partitions),
            RawEvent::GroupRevoke(partitions) => Signal::Revoked(partitions),
            RawEvent::GroupLost(partitions) => Signal::Lost(partitions),
            RawEvent::LogEnd(partition) => Signal::LogEnd(partition),
            RawEvent::CommitAck {
                token,
                offsets,
                error,
            } => Signal::CommitAck {
                token,
                offsets,
                error,
            },
            RawEvent::AdminReply { token, reply } => Signal::AdminReply { token, reply },
            RawEvent::Failure { code, detail } => {
                Signal::Failure(ClientError::new(code, detail))
            }
            // A poll caller depends on forward progress: an event kind we
            // cannot map still has to come out as *something*.
            RawEvent::Native { code, detail } => {
                warn!(code, detail, "unmapped native engine event");
                metrics::counter!(UNMAPPED_ENGINE_EVENTS).increment(1);
                Signal::Failure(ClientError::new(
                    ErrorCode::Engine,
                    format!("native event {code}: {detail}"),
                ))
            }
        }
    }
}
