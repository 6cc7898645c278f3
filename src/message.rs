//! Message and queue identity types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a single partition: `(topic, broker, queue id)`.
///
/// Equality, hashing and ordering are over the full triple; the ordering is
/// lexicographic with a numeric tie-break on `queue_id`, which is what the
/// allocation strategies rely on for cross-client determinism.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageQueue {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: i32,
}

impl MessageQueue {
    pub fn new(topic: impl Into<String>, broker_name: impl Into<String>, queue_id: i32) -> Self {
        Self {
            topic: topic.into(),
            broker_name: broker_name.into(),
            queue_id,
        }
    }

    /// Canonical string key, `"topic@broker@id"`.
    pub fn key(&self) -> String {
        format!("{}@{}@{}", self.topic, self.broker_name, self.queue_id)
    }

    /// Parse a canonical `"topic@broker@id"` key back into a queue identity.
    ///
    /// Used when loading the persisted offset file; `None` for malformed keys.
    pub fn from_key(key: &str) -> Option<Self> {
        let (rest, id) = key.rsplit_once('@')?;
        let (topic, broker_name) = rest.split_once('@')?;
        let queue_id = id.parse::<i32>().ok()?;
        if topic.is_empty() || broker_name.is_empty() {
            return None;
        }
        Some(Self::new(topic, broker_name, queue_id))
    }
}

impl fmt::Display for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}@{}", self.topic, self.broker_name, self.queue_id)
    }
}

/// A message as received from the broker, with queue placement metadata.
#[derive(Debug, Clone)]
pub struct MessageExt {
    pub topic: String,
    pub tags: Option<String>,
    pub keys: Option<String>,
    pub body: Bytes,
    pub queue_id: i32,
    /// Broker-assigned offset of this message within its queue
    pub queue_offset: i64,
    pub born_timestamp: i64,
    pub msg_id: String,
    pub properties: HashMap<String, String>,
}

impl MessageExt {
    pub fn new(topic: impl Into<String>, queue_id: i32, queue_offset: i64, body: Bytes) -> Self {
        Self {
            topic: topic.into(),
            tags: None,
            keys: None,
            body,
            queue_id,
            queue_offset,
            born_timestamp: 0,
            msg_id: String::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }
}

/// Broker reply tag on a pull response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// Messages were found and returned
    Found,
    /// No new messages at the requested offset
    NoNewMessage,
    /// Messages exist but none matched the server-side filter
    NoMatchedMessage,
    /// The requested offset is outside the queue's valid range
    OffsetIllegal,
}

/// Result of one long-poll pull
#[derive(Debug, Clone)]
pub struct PullResult {
    pub pull_status: PullStatus,
    /// Offset to request on the next pull
    pub next_begin_offset: i64,
    pub min_offset: i64,
    pub max_offset: i64,
    /// Replica the broker suggests reading from next (master = 0)
    pub suggest_which_broker_id: u64,
    pub messages: Vec<MessageExt>,
}

impl PullResult {
    pub fn new(pull_status: PullStatus, next_begin_offset: i64) -> Self {
        Self {
            pull_status,
            next_begin_offset,
            min_offset: 0,
            max_offset: 0,
            suggest_which_broker_id: crate::protocol::MASTER_BROKER_ID,
            messages: Vec::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<MessageExt>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_suggested_broker(mut self, broker_id: u64) -> Self {
        self.suggest_which_broker_id = broker_id;
        self
    }
}
