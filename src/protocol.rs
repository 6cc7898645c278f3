//! Pull wire contract: request header, system flag bits, broker ids
//!
//! The shapes here must match what the broker expects on the pull RPC; the
//! transport client carries them verbatim.

use serde::{Deserialize, Serialize};

/// Broker id of the master replica
pub const MASTER_BROKER_ID: u64 = 0;

/// Prefix marking broker-managed redelivery topics
pub const RETRY_TOPIC_PREFIX: &str = "%RETRY%";

/// True for topics carrying redelivered messages (`%RETRY%<group>`)
pub fn is_retry_topic(topic: &str) -> bool {
    topic.starts_with(RETRY_TOPIC_PREFIX)
}

/// System flag bit layout on the pull request
pub mod sys_flag {
    /// Client has a committable offset
    pub const COMMIT_OFFSET: i32 = 1 << 0;
    /// Broker may long-poll the request
    pub const SUSPEND: i32 = 1 << 1;
    /// Request carries the subscription expression
    pub const SUBSCRIPTION: i32 = 1 << 2;
    /// Subscription is a class filter
    pub const CLASS_FILTER: i32 = 1 << 3;

    pub fn build(commit_offset: bool, suspend: bool, subscription: bool, class_filter: bool) -> i32 {
        let mut flag = 0;
        if commit_offset {
            flag |= COMMIT_OFFSET;
        }
        if suspend {
            flag |= SUSPEND;
        }
        if subscription {
            flag |= SUBSCRIPTION;
        }
        if class_filter {
            flag |= CLASS_FILTER;
        }
        flag
    }

    /// Slaves cannot accept offset commits; the bit is cleared before
    /// pulling from one.
    pub fn clear_commit_offset(flag: i32) -> i32 {
        flag & !COMMIT_OFFSET
    }

    pub fn has_commit_offset(flag: i32) -> bool {
        flag & COMMIT_OFFSET != 0
    }

    pub fn has_suspend(flag: i32) -> bool {
        flag & SUSPEND != 0
    }

    pub fn has_subscription(flag: i32) -> bool {
        flag & SUBSCRIPTION != 0
    }

    pub fn has_class_filter(flag: i32) -> bool {
        flag & CLASS_FILTER != 0
    }
}

/// Header of the long-poll pull RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullMessageRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: i32,
    /// Broker-side offset to read from
    pub queue_offset: i64,
    pub max_msg_nums: i32,
    pub sys_flag: i32,
    /// Consumed offset piggybacked for the broker-side store; meaningful
    /// only when the COMMIT_OFFSET bit is set
    pub commit_offset: i64,
    /// How long the broker may hold the request open
    pub suspend_timeout_millis: u64,
    pub subscription: Option<String>,
    pub sub_version: i64,
}
