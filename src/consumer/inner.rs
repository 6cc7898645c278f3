//! State shared between the façade, the rebalancer and the pull workers

use crate::client::SharedMqClient;
use crate::config::ConsumerConfig;
use crate::consumer::allocate::AllocateMessageQueueStrategy;
use crate::consumer::listener::MessageListener;
use crate::consumer::process_queue::PullEntry;
use crate::message::MessageQueue;
use crate::offset::OffsetStore;
use crate::subscription::SubscriptionData;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Notifications the consumer emits alongside message delivery.
///
/// The channel is lossy by design: a slow or absent subscriber can never
/// block or corrupt the rebalance and pull loops.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// The owned queue set for a topic changed during a rebalance
    QueueChanged {
        topic: String,
        queues: Vec<MessageQueue>,
    },
    /// A non-fatal error from the client, the offset store or a pull worker
    Error(String),
}

pub(crate) struct ConsumerInner {
    pub config: ConsumerConfig,
    pub client: SharedMqClient,
    pub offset_store: Arc<dyn OffsetStore>,
    /// Topic → parsed filter expression
    pub subscriptions: DashMap<String, SubscriptionData>,
    /// The process-queue table: one row per owned queue, same lifetime as
    /// the queue's pull worker
    pub table: DashMap<MessageQueue, Arc<PullEntry>>,
    /// Replica hint per queue (master = 0), updated from pull responses
    pub pull_from_which_node: DashMap<MessageQueue, u64>,
    pub listener: RwLock<Option<Arc<dyn MessageListener>>>,
    pub allocator: RwLock<Arc<dyn AllocateMessageQueueStrategy>>,
    pub events: broadcast::Sender<ConsumerEvent>,
    pub running: AtomicBool,
    /// Serializes rebalance passes; workers run concurrently with them
    pub rebalance_lock: tokio::sync::Mutex<()>,
}

impl ConsumerInner {
    pub fn group(&self) -> &str {
        &self.config.consumer_group
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: ConsumerEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_error(&self, error: &dyn fmt::Display) {
        self.emit(ConsumerEvent::Error(error.to_string()));
    }

    pub fn current_listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.listener.read().clone()
    }

    pub fn owned_queues(&self) -> Vec<MessageQueue> {
        self.table.iter().map(|e| e.key().clone()).collect()
    }
}
