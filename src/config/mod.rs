//! Consumer configuration
//!
//! `ConsumerConfig` carries every tunable the consumer core recognizes.
//! Invalid combinations are fatal at construction: `validate()` runs inside
//! `PushConsumer::new` and a failure there never reaches the broker.

mod defaults;

pub use defaults::*;

use crate::error::ConfigError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How queues are divided among group members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageModel {
    /// Every group member consumes every queue; offsets are kept in a local
    /// file per consumer group
    Broadcasting,
    /// Queues are partitioned across group members; offsets live on the
    /// broker
    Clustering,
}

/// Where a queue starts when no committed offset exists yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeFromWhere {
    /// Resume from the committed offset; first contact starts at the tail
    /// (retry topics start at 0)
    LastOffset,
    /// Resume from the committed offset; first contact starts at 0
    FirstOffset,
    /// Resume from the committed offset; first contact searches the offset
    /// at `consume_timestamp` (retry topics start at the tail)
    Timestamp,
}

/// Complete configuration for a [`PushConsumer`](crate::PushConsumer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group identity within the cluster (required)
    pub consumer_group: String,

    /// Broadcasting or clustering consumption (default: clustering)
    pub message_model: MessageModel,

    /// First-time offset seeding policy
    pub consume_from_where: ConsumeFromWhere,

    /// `yyyyMMddHHmmss` timestamp for [`ConsumeFromWhere::Timestamp`];
    /// `None` means "now minus 30 minutes", evaluated at seed time
    pub consume_timestamp: Option<String>,

    /// Messages requested per pull
    pub pull_batch_size: i32,

    /// Idle gap between pulls per queue
    pub pull_interval_millis: u64,

    /// Soft flow-control ceiling on unacked messages per queue
    pub pull_threshold_for_queue: u32,

    /// Server long-poll hang time sent on every pull
    pub broker_suspend_max_time_millis: u64,

    /// Pull RPC timeout; must strictly exceed `broker_suspend_max_time_millis`
    pub consumer_timeout_millis_when_suspend: u64,

    /// Back-off after a pull error
    pub pull_time_delay_millis_when_exception: u64,

    /// Re-send the subscription expression on every pull
    pub post_subscription_when_pull: bool,

    /// Maximum messages per delivery batch
    pub consume_message_batch_max_size: usize,

    /// How long a delivered batch may stay unacknowledged before the pull
    /// is failed and the batch is left for redelivery
    pub consume_ack_timeout_millis: u64,

    /// Cadence of the periodic rebalance pass
    pub rebalance_interval_millis: u64,

    /// Cadence of the periodic `persist_all` offset flush
    pub persist_offset_interval_millis: u64,

    /// Idle threshold after which a stalled pull worker is evicted
    pub pull_max_idle_millis: u64,

    /// Base directory for the broadcast-mode offset file
    pub offset_store_dir: PathBuf,

    /// Client instance name; `DEFAULT` is rewritten to the process id in
    /// cluster mode so instances on one host do not collide
    pub instance_name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_group: String::new(),
            message_model: MessageModel::Clustering,
            consume_from_where: ConsumeFromWhere::LastOffset,
            consume_timestamp: None,
            pull_batch_size: DEFAULT_PULL_BATCH_SIZE,
            pull_interval_millis: DEFAULT_PULL_INTERVAL_MILLIS,
            pull_threshold_for_queue: DEFAULT_PULL_THRESHOLD_FOR_QUEUE,
            broker_suspend_max_time_millis: DEFAULT_BROKER_SUSPEND_MAX_TIME_MILLIS,
            consumer_timeout_millis_when_suspend: DEFAULT_CONSUMER_TIMEOUT_MILLIS_WHEN_SUSPEND,
            pull_time_delay_millis_when_exception: DEFAULT_PULL_TIME_DELAY_MILLIS_WHEN_EXCEPTION,
            post_subscription_when_pull: true,
            consume_message_batch_max_size: DEFAULT_CONSUME_MESSAGE_BATCH_MAX_SIZE,
            consume_ack_timeout_millis: DEFAULT_CONSUME_ACK_TIMEOUT_MILLIS,
            rebalance_interval_millis: DEFAULT_REBALANCE_INTERVAL_MILLIS,
            persist_offset_interval_millis: DEFAULT_PERSIST_OFFSET_INTERVAL_MILLIS,
            pull_max_idle_millis: DEFAULT_PULL_MAX_IDLE_MILLIS,
            offset_store_dir: PathBuf::from(DEFAULT_OFFSET_STORE_DIR),
            instance_name: DEFAULT_INSTANCE_NAME.to_string(),
        }
    }
}

impl ConsumerConfig {
    /// Start a builder with the one required setting.
    pub fn builder(consumer_group: impl Into<String>) -> ConsumerConfigBuilder {
        ConsumerConfigBuilder {
            config: ConsumerConfig {
                consumer_group: consumer_group.into(),
                ..ConsumerConfig::default()
            },
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.message_model == MessageModel::Broadcasting
    }

    /// Reject configurations the consumer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_group.trim().is_empty() {
            return Err(ConfigError::missing("consumer_group"));
        }
        if self.pull_batch_size <= 0 {
            return Err(ConfigError::invalid_setting(
                "pull_batch_size",
                "must be positive",
            ));
        }
        if self.consume_message_batch_max_size == 0 {
            return Err(ConfigError::invalid_setting(
                "consume_message_batch_max_size",
                "must be at least 1",
            ));
        }
        if self.consumer_timeout_millis_when_suspend <= self.broker_suspend_max_time_millis {
            return Err(ConfigError::invalid_setting(
                "consumer_timeout_millis_when_suspend",
                format!(
                    "must strictly exceed broker_suspend_max_time_millis ({}ms)",
                    self.broker_suspend_max_time_millis
                ),
            ));
        }
        if self.rebalance_interval_millis == 0 {
            return Err(ConfigError::invalid_setting(
                "rebalance_interval_millis",
                "must be positive",
            ));
        }
        if self.persist_offset_interval_millis == 0 {
            return Err(ConfigError::invalid_setting(
                "persist_offset_interval_millis",
                "must be positive",
            ));
        }
        if let Some(ts) = &self.consume_timestamp {
            parse_consume_timestamp(ts)?;
        }
        Ok(())
    }

    /// Seed timestamp for [`ConsumeFromWhere::Timestamp`], in epoch millis.
    ///
    /// `validate()` has already established that a configured string parses,
    /// so a failure here falls back to the default backtrack window.
    pub fn consume_timestamp_millis(&self) -> i64 {
        match &self.consume_timestamp {
            Some(ts) => parse_consume_timestamp(ts)
                .unwrap_or_else(|_| default_consume_timestamp_millis()),
            None => default_consume_timestamp_millis(),
        }
    }

    /// Instance identity used to key the shared client registry. Cluster
    /// mode replaces the `DEFAULT` name with the process id.
    pub fn effective_instance_name(&self) -> String {
        if !self.is_broadcast() && self.instance_name == DEFAULT_INSTANCE_NAME {
            std::process::id().to_string()
        } else {
            self.instance_name.clone()
        }
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_millis)
    }

    pub fn pull_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer_timeout_millis_when_suspend)
    }

    pub fn pull_exception_delay(&self) -> Duration {
        Duration::from_millis(self.pull_time_delay_millis_when_exception)
    }

    pub fn consume_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_ack_timeout_millis)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_millis)
    }

    pub fn persist_offset_interval(&self) -> Duration {
        Duration::from_millis(self.persist_offset_interval_millis)
    }
}

fn default_consume_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis() - DEFAULT_CONSUME_TIMESTAMP_BACKTRACK_MILLIS
}

fn parse_consume_timestamp(ts: &str) -> Result<i64, ConfigError> {
    NaiveDateTime::parse_from_str(ts, "%Y%m%d%H%M%S")
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| {
            ConfigError::invalid_setting(
                "consume_timestamp",
                format!("expected yyyyMMddHHmmss, got {:?}: {}", ts, e),
            )
        })
}

/// Builder for [`ConsumerConfig`]
#[derive(Debug, Clone)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.config.message_model = if broadcast {
            MessageModel::Broadcasting
        } else {
            MessageModel::Clustering
        };
        self
    }

    pub fn consume_from_where(mut self, policy: ConsumeFromWhere) -> Self {
        self.config.consume_from_where = policy;
        self
    }

    pub fn consume_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.config.consume_timestamp = Some(ts.into());
        self
    }

    pub fn pull_batch_size(mut self, n: i32) -> Self {
        self.config.pull_batch_size = n;
        self
    }

    pub fn pull_interval_millis(mut self, millis: u64) -> Self {
        self.config.pull_interval_millis = millis;
        self
    }

    pub fn pull_threshold_for_queue(mut self, n: u32) -> Self {
        self.config.pull_threshold_for_queue = n;
        self
    }

    pub fn broker_suspend_max_time_millis(mut self, millis: u64) -> Self {
        self.config.broker_suspend_max_time_millis = millis;
        self
    }

    pub fn consumer_timeout_millis_when_suspend(mut self, millis: u64) -> Self {
        self.config.consumer_timeout_millis_when_suspend = millis;
        self
    }

    pub fn pull_time_delay_millis_when_exception(mut self, millis: u64) -> Self {
        self.config.pull_time_delay_millis_when_exception = millis;
        self
    }

    pub fn post_subscription_when_pull(mut self, post: bool) -> Self {
        self.config.post_subscription_when_pull = post;
        self
    }

    pub fn consume_message_batch_max_size(mut self, n: usize) -> Self {
        self.config.consume_message_batch_max_size = n;
        self
    }

    pub fn consume_ack_timeout_millis(mut self, millis: u64) -> Self {
        self.config.consume_ack_timeout_millis = millis;
        self
    }

    pub fn rebalance_interval_millis(mut self, millis: u64) -> Self {
        self.config.rebalance_interval_millis = millis;
        self
    }

    pub fn persist_offset_interval_millis(mut self, millis: u64) -> Self {
        self.config.persist_offset_interval_millis = millis;
        self
    }

    pub fn offset_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.offset_store_dir = dir.into();
        self
    }

    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.config.instance_name = name.into();
        self
    }

    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}
