//! Per-queue runtime state shared between a pull worker and the rebalancer

use crate::message::MessageQueue;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Mutable control block for one owned queue.
///
/// The pull worker writes the pull timestamp and the cached-message gauge;
/// the rebalancer (and the worker itself on an illegal offset) flips the
/// drop flag. Dropped is write-once: a `ProcessQueue` never un-drops.
#[derive(Debug)]
pub struct ProcessQueue {
    last_pull_timestamp: AtomicI64,
    dropped: AtomicBool,
    cached_msg_count: AtomicI64,
}

impl ProcessQueue {
    pub fn new() -> Self {
        Self {
            last_pull_timestamp: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            dropped: AtomicBool::new(false),
            cached_msg_count: AtomicI64::new(0),
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }

    /// Record that a pull attempt is happening now.
    pub fn touch_pull(&self) {
        self.last_pull_timestamp
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_pull_timestamp(&self) -> i64 {
        self.last_pull_timestamp.load(Ordering::Relaxed)
    }

    /// True when no pull has happened for longer than `max_idle_millis`;
    /// the rebalancer evicts such stalled workers.
    pub fn is_pull_expired(&self, max_idle_millis: u64) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        now - self.last_pull_timestamp() > max_idle_millis as i64
    }

    pub fn cached_msg_count(&self) -> i64 {
        self.cached_msg_count.load(Ordering::Relaxed)
    }

    pub fn add_cached(&self, n: usize) {
        self.cached_msg_count.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn sub_cached(&self, n: usize) {
        self.cached_msg_count.fetch_sub(n as i64, Ordering::Relaxed);
    }
}

impl Default for ProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of the process-queue table.
///
/// `next_offset` is advanced only by the owning pull worker; the rebalancer
/// creates rows and flips the drop flag but never touches the offset.
#[derive(Debug)]
pub struct PullEntry {
    pub message_queue: MessageQueue,
    pub process_queue: Arc<ProcessQueue>,
    next_offset: AtomicI64,
}

impl PullEntry {
    pub fn new(message_queue: MessageQueue, next_offset: i64) -> Self {
        Self {
            message_queue,
            process_queue: Arc::new(ProcessQueue::new()),
            next_offset: AtomicI64::new(next_offset),
        }
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset.load(Ordering::SeqCst)
    }

    pub fn set_next_offset(&self, offset: i64) {
        self.next_offset.store(offset, Ordering::SeqCst);
    }
}
