//! Scripted in-memory transport client for integration tests

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use pushline::error::{ClientError, Result};
use pushline::protocol::PullMessageRequestHeader;
use pushline::{BrokerAddress, MessageQueue, MqClient, PullResult, PullStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Mock `MqClient` with scripted pull responses.
///
/// Pull responses are queued per `(topic, queue_id)`; once a queue's script
/// runs dry the mock answers `NoNewMessage` at the requested offset, which
/// keeps workers politely idling.
pub struct MockMqClient {
    client_id: String,
    pub routes: RwLock<HashMap<String, Vec<MessageQueue>>>,
    pub consumer_ids: RwLock<Vec<String>>,
    pull_scripts: Mutex<HashMap<(String, i32), VecDeque<PullResult>>>,
    committed: Mutex<HashMap<MessageQueue, i64>>,
    pub max_offsets: RwLock<HashMap<MessageQueue, i64>>,
    pub search_results: RwLock<HashMap<MessageQueue, i64>>,
    pull_log: Mutex<Vec<PullMessageRequestHeader>>,
    pub route_refreshes: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub registrations: AtomicUsize,
    pub closes: AtomicUsize,
    /// When true, pulls fail with a transport error
    pub fail_pulls: RwLock<bool>,
}

impl MockMqClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            routes: RwLock::new(HashMap::new()),
            consumer_ids: RwLock::new(Vec::new()),
            pull_scripts: Mutex::new(HashMap::new()),
            committed: Mutex::new(HashMap::new()),
            max_offsets: RwLock::new(HashMap::new()),
            search_results: RwLock::new(HashMap::new()),
            pull_log: Mutex::new(Vec::new()),
            route_refreshes: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_pulls: RwLock::new(false),
        }
    }

    /// Register a topic route of `queues` queues on a single broker.
    pub fn with_topic(self, topic: &str, broker: &str, queues: i32) -> Self {
        let mqs = (0..queues)
            .map(|id| MessageQueue::new(topic, broker, id))
            .collect();
        self.routes.write().insert(topic.to_string(), mqs);
        self
    }

    pub fn with_consumer_ids(self, cids: &[&str]) -> Self {
        *self.consumer_ids.write() = cids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Queue the next pull response for `(topic, queue_id)`.
    pub fn script_pull(&self, topic: &str, queue_id: i32, result: PullResult) {
        self.pull_scripts
            .lock()
            .entry((topic.to_string(), queue_id))
            .or_default()
            .push_back(result);
    }

    pub fn committed_offset(&self, mq: &MessageQueue) -> Option<i64> {
        self.committed.lock().get(mq).copied()
    }

    pub fn pull_log_snapshot(&self) -> Vec<PullMessageRequestHeader> {
        self.pull_log.lock().clone()
    }

    pub fn pull_count(&self) -> usize {
        self.pull_log.lock().len()
    }
}

#[async_trait]
impl MqClient for MockMqClient {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    async fn register_consumer(&self, _group: &str) -> Result<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister_consumer(&self, _group: &str) -> Result<()> {
        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_all_topic_router_info(&self) -> Result<()> {
        self.route_refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_topic_route_info(&self, _topic: &str) -> Result<()> {
        self.route_refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_heartbeat_to_all_broker(&self) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn topic_subscribe_info(&self, topic: &str) -> Vec<MessageQueue> {
        self.routes.read().get(topic).cloned().unwrap_or_default()
    }

    async fn find_consumer_id_list(&self, _topic: &str, _group: &str) -> Result<Vec<String>> {
        Ok(self.consumer_ids.read().clone())
    }

    async fn find_broker_address_in_subscribe(
        &self,
        broker_name: &str,
        broker_id: u64,
        _only_this_broker: bool,
    ) -> Option<BrokerAddress> {
        Some(BrokerAddress {
            addr: format!("{}:10911", broker_name),
            slave: broker_id != pushline::protocol::MASTER_BROKER_ID,
        })
    }

    async fn pull_message(
        &self,
        _broker_addr: &str,
        header: PullMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<PullResult> {
        if *self.fail_pulls.read() {
            return Err(ClientError::rpc("pull_message", "connection refused").into());
        }
        let key = (header.topic.clone(), header.queue_id);
        let queue_offset = header.queue_offset;
        self.pull_log.lock().push(header);

        let scripted = self.pull_scripts.lock().get_mut(&key).and_then(|q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| PullResult::new(PullStatus::NoNewMessage, queue_offset)))
    }

    async fn max_offset(&self, mq: &MessageQueue) -> Result<i64> {
        Ok(self.max_offsets.read().get(mq).copied().unwrap_or(0))
    }

    async fn search_offset(&self, mq: &MessageQueue, _timestamp_millis: i64) -> Result<i64> {
        Ok(self.search_results.read().get(mq).copied().unwrap_or(0))
    }

    async fn query_consumer_offset(&self, _group: &str, mq: &MessageQueue) -> Result<i64> {
        Ok(self.committed.lock().get(mq).copied().unwrap_or(-1))
    }

    async fn update_consumer_offset(
        &self,
        _group: &str,
        mq: &MessageQueue,
        offset: i64,
    ) -> Result<()> {
        self.committed.lock().insert(mq.clone(), offset);
        Ok(())
    }
}

/// Clone a mock as the trait object `PushConsumer::new` factories return.
pub fn shared(client: &std::sync::Arc<MockMqClient>) -> pushline::SharedMqClient {
    let shared: pushline::SharedMqClient = std::sync::Arc::clone(client) as pushline::SharedMqClient;
    shared
}

/// Poll `condition` with a short paused-clock sleep until it holds; panics
/// after a bounded number of attempts.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}
