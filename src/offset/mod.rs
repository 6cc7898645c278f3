//! Consumed-offset stores
//!
//! One interface, two backings: a local JSON file for broadcast mode and
//! the broker itself for cluster mode. The store is the source of truth for
//! where a re-acquired queue resumes, so every write discipline here is in
//! service of at-least-once delivery: a missed flush means duplicates, never
//! loss.

mod local_file;
mod remote_broker;

pub use local_file::LocalFileOffsetStore;
pub use remote_broker::RemoteBrokerOffsetStore;

use crate::error::Result;
use crate::message::MessageQueue;
use async_trait::async_trait;
use std::collections::HashMap;

/// Where `read_offset` is allowed to look
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOffsetType {
    /// In-memory table only
    ReadFromMemory,
    /// Stable storage (file or broker), refreshing the memory cache
    ReadFromStore,
    /// Memory first, falling back to stable storage on a miss
    MemoryFirstThenStore,
}

/// Authoritative consumed-offset per (consumer group, queue).
///
/// `read_offset` reports `-1` for unknown queues and on read errors; write
/// errors are logged and retried on the next `persist_all` cycle.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Initialize from stable storage.
    async fn load(&self) -> Result<()>;

    /// Last known offset for `mq`, or `-1` when absent.
    async fn read_offset(&self, mq: &MessageQueue, read_type: ReadOffsetType) -> i64;

    /// Set the in-memory offset. With `increase_only`, only a strictly
    /// greater value replaces the current one.
    fn update_offset(&self, mq: &MessageQueue, offset: i64, increase_only: bool);

    /// Flush one queue's offset to stable storage.
    async fn persist(&self, mq: &MessageQueue) -> Result<()>;

    /// Batch flush; failures are logged per queue and retried next cycle.
    async fn persist_all(&self, mqs: &[MessageQueue]);

    /// Drop the in-memory record for `mq`.
    fn remove_offset(&self, mq: &MessageQueue);

    /// Snapshot of the in-memory table.
    fn offset_table_snapshot(&self) -> HashMap<MessageQueue, i64>;
}

/// Shared `increase_only` update over a concurrent offset table.
pub(crate) fn update_offset_table(
    table: &dashmap::DashMap<MessageQueue, i64>,
    mq: &MessageQueue,
    offset: i64,
    increase_only: bool,
) {
    match table.entry(mq.clone()) {
        dashmap::mapref::entry::Entry::Occupied(mut entry) => {
            if !increase_only || offset > *entry.get() {
                entry.insert(offset);
            }
        }
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(offset);
        }
    }
}
