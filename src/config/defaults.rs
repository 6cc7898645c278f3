//! Default constants for consumer configuration

/// Default messages per pull
pub const DEFAULT_PULL_BATCH_SIZE: i32 = 32;

/// Default idle gap between pulls per queue (0 = immediate)
pub const DEFAULT_PULL_INTERVAL_MILLIS: u64 = 0;

/// Default soft ceiling on unacked messages cached per queue
pub const DEFAULT_PULL_THRESHOLD_FOR_QUEUE: u32 = 1000;

/// Default broker-side long-poll hang time
pub const DEFAULT_BROKER_SUSPEND_MAX_TIME_MILLIS: u64 = 15_000;

/// Default pull RPC timeout; must strictly exceed the broker suspend time
pub const DEFAULT_CONSUMER_TIMEOUT_MILLIS_WHEN_SUSPEND: u64 = 30_000;

/// Default back-off after a pull error
pub const DEFAULT_PULL_TIME_DELAY_MILLIS_WHEN_EXCEPTION: u64 = 3_000;

/// Default maximum messages per delivery batch
pub const DEFAULT_CONSUME_MESSAGE_BATCH_MAX_SIZE: usize = 1;

/// Default per-batch delivery acknowledgement timeout
pub const DEFAULT_CONSUME_ACK_TIMEOUT_MILLIS: u64 = 3_000;

/// Default cadence of the periodic rebalance timer
pub const DEFAULT_REBALANCE_INTERVAL_MILLIS: u64 = 20_000;

/// Default cadence of the periodic offset flush
pub const DEFAULT_PERSIST_OFFSET_INTERVAL_MILLIS: u64 = 5_000;

/// A queue whose worker has not pulled for this long is considered stalled
/// and is evicted on the next rebalance
pub const DEFAULT_PULL_MAX_IDLE_MILLIS: u64 = 120_000;

/// Delay applied instead of pulling while the per-queue cache is over the
/// flow-control threshold
pub const PULL_TIME_DELAY_MILLIS_FLOW_CONTROL: u64 = 50;

/// Delay before acting on an OFFSET_ILLEGAL reply
pub const OFFSET_ILLEGAL_BACKOFF_MILLIS: u64 = 10_000;

/// How far behind `now` the timestamp seed defaults to when no
/// `consume_timestamp` is configured (30 minutes)
pub const DEFAULT_CONSUME_TIMESTAMP_BACKTRACK_MILLIS: i64 = 30 * 60 * 1000;

/// Default base directory for the broadcast-mode offset file
pub const DEFAULT_OFFSET_STORE_DIR: &str = "./data/offsets";

/// Default client instance name; rewritten to the process id in cluster mode
pub const DEFAULT_INSTANCE_NAME: &str = "DEFAULT";
