use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ErrorCode;

/// Producer partition sentinel: let the engine pick the partition.
pub const PARTITION_ANY: i32 = -1;

/// A position in a partition log, or one of the symbolic positions the
/// engine resolves at fetch/commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Start of the partition.
    Beginning,
    /// Next offset past the last record.
    End,
    /// The offset last committed for the consumer group.
    Stored,
    /// No offset available.
    Invalid,
    /// A concrete log position.
    At(i64),
}

impl Offset {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Offset::At(offset) => Some(*offset),
            _ => None,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Beginning => write!(f, "beginning"),
            Offset::End => write!(f, "end"),
            Offset::Stored => write!(f, "stored"),
            Offset::Invalid => write!(f, "invalid"),
            Offset::At(offset) => write!(f, "{offset}"),
        }
    }
}

/// Record timestamp in milliseconds since the epoch, tagged with how it
/// was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    NotAvailable,
    CreateTime(i64),
    LogAppendTime(i64),
}

impl Timestamp {
    pub fn millis(&self) -> Option<i64> {
        match self {
            Timestamp::NotAvailable => None,
            Timestamp::CreateTime(ms) | Timestamp::LogAppendTime(ms) => Some(*ms),
        }
    }
}

/// One record header. Headers are ordered and keys may repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl Header {
    pub fn new(key: impl Into<String>, value: Option<&[u8]>) -> Self {
        Self {
            key: key.into(),
            value: value.map(|v| v.to_vec()),
        }
    }
}

/// A (topic, partition) pair used both as a request parameter and as a
/// result carrier. Identity is the pair alone: `offset`, `leader_epoch`
/// and `error` are payload and do not participate in equality or
/// hashing, so assignment-set operations behave like set operations.
#[derive(Debug, Clone)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: Offset,
    pub leader_epoch: Option<i32>,
    pub error: Option<ErrorCode>,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: Offset::Invalid,
            leader_epoch: None,
            error: None,
        }
    }

    pub fn with_offset(topic: impl Into<String>, partition: i32, offset: Offset) -> Self {
        Self {
            offset,
            ..Self::new(topic, partition)
        }
    }

    pub(crate) fn index(&self) -> (String, i32) {
        (self.topic.clone(), self.partition)
    }
}

impl PartialEq for TopicPartition {
    fn eq(&self, other: &Self) -> bool {
        self.topic == other.topic && self.partition == other.partition
    }
}

impl Eq for TopicPartition {}

impl Hash for TopicPartition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.topic.hash(state);
        self.partition.hash(state);
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A consumed record. Owned by the caller once returned from the poll
/// path; never mutated by the library afterwards.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<Header>,
    pub timestamp: Timestamp,
    pub leader_epoch: Option<i32>,
}

impl Message {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::with_offset(self.topic.clone(), self.partition, Offset::At(self.offset))
    }

    /// The offset to commit after processing this message: the position
    /// of the next record to read.
    pub fn next_offset(&self) -> TopicPartition {
        TopicPartition::with_offset(
            self.topic.clone(),
            self.partition,
            Offset::At(self.offset + 1),
        )
    }
}

/// A record to produce. `O` is the caller-supplied opaque correlation
/// value echoed back on the delivery report; it defaults to `()` for
/// callers that do not correlate.
#[derive(Debug, Clone)]
pub struct Record<O = ()> {
    pub topic: String,
    pub partition: i32,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<Header>,
    pub timestamp: Option<i64>,
    pub opaque: O,
}

impl Record<()> {
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: PARTITION_ANY,
            key: None,
            value: None,
            headers: Vec::new(),
            timestamp: None,
            opaque: (),
        }
    }
}

impl<O> Record<O> {
    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    pub fn key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: Option<&[u8]>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Attach a caller opaque, changing the record's correlation type.
    pub fn opaque<T>(self, opaque: T) -> Record<T> {
        Record {
            topic: self.topic,
            partition: self.partition,
            key: self.key,
            value: self.value,
            headers: self.headers,
            timestamp: self.timestamp,
            opaque,
        }
    }
}

/// Terminal outcome for one produced record. The per-message error slot
/// lives on `partition.error`; `opaque` is the caller's correlation
/// value, returned exactly once per produced record.
#[derive(Debug)]
pub struct DeliveryReport<O = ()> {
    pub partition: TopicPartition,
    pub timestamp: Timestamp,
    pub opaque: O,
}

impl<O> DeliveryReport<O> {
    pub fn error(&self) -> Option<ErrorCode> {
        self.partition.error
    }
}
