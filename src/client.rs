//! Transport client seam and the shared client-instance registry
//!
//! The consumer core never speaks to the network itself. Everything that
//! crosses the wire (name-server lookups, heartbeats, route discovery and
//! the raw pull RPC) goes through the [`MqClient`] trait. Production code
//! plugs in a real remoting client; tests plug in a scripted mock.

use crate::error::Result;
use crate::message::{MessageQueue, PullResult};
use crate::protocol::PullMessageRequestHeader;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Resolved broker endpoint
#[derive(Debug, Clone)]
pub struct BrokerAddress {
    pub addr: String,
    /// True when the resolved replica is a slave; offset commits must not
    /// piggyback on pulls to a slave
    pub slave: bool,
}

/// Interface the consumer core expects from the transport client.
///
/// One client instance is shared by every consumer in the process with the
/// same instance identity (see [`instances`]); each method may fail and
/// failures bubble up as [`crate::error::ClientError`]s.
#[async_trait]
pub trait MqClient: Send + Sync {
    /// Unique identifier of this client instance within its group
    fn client_id(&self) -> String;

    async fn register_consumer(&self, group: &str) -> Result<()>;

    async fn unregister_consumer(&self, group: &str) -> Result<()>;

    /// Resolves once the client has finished its startup handshake
    async fn ready(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn update_all_topic_router_info(&self) -> Result<()>;

    async fn update_topic_route_info(&self, topic: &str) -> Result<()>;

    async fn send_heartbeat_to_all_broker(&self) -> Result<()>;

    /// Queue set of `topic` from the cached route table; empty when the
    /// route is unknown
    fn topic_subscribe_info(&self, topic: &str) -> Vec<MessageQueue>;

    async fn find_consumer_id_list(&self, topic: &str, group: &str) -> Result<Vec<String>>;

    /// Resolve a broker address from the cached routes. `None` when the
    /// broker (or the requested replica, with `only_this_broker`) is not
    /// known; callers refresh the route and retry once.
    async fn find_broker_address_in_subscribe(
        &self,
        broker_name: &str,
        broker_id: u64,
        only_this_broker: bool,
    ) -> Option<BrokerAddress>;

    /// The long-poll pull RPC
    async fn pull_message(
        &self,
        broker_addr: &str,
        header: PullMessageRequestHeader,
        timeout: Duration,
    ) -> Result<PullResult>;

    /// Tail offset of a queue
    async fn max_offset(&self, mq: &MessageQueue) -> Result<i64>;

    /// Offset of the first message at or after `timestamp_millis`
    async fn search_offset(&self, mq: &MessageQueue, timestamp_millis: i64) -> Result<i64>;

    /// Broker-side committed offset; `-1` when none exists
    async fn query_consumer_offset(&self, group: &str, mq: &MessageQueue) -> Result<i64>;

    async fn update_consumer_offset(&self, group: &str, mq: &MessageQueue, offset: i64)
        -> Result<()>;
}

/// Process-wide, reference-counted client instances keyed by instance
/// identity.
///
/// Consumers with the same identity share one client (and therefore one
/// connection pool); the client is closed by the last consumer to release
/// it. This replaces an ambient import-time singleton with an explicit
/// registry.
pub mod instances {
    use super::MqClient;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::{Arc, OnceLock};

    struct Entry {
        client: Arc<dyn MqClient>,
        consumers: usize,
    }

    fn registry() -> &'static Mutex<HashMap<String, Entry>> {
        static REGISTRY: OnceLock<Mutex<HashMap<String, Entry>>> = OnceLock::new();
        REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
    }

    /// Get the shared client for `key`, creating it with `factory` on first
    /// acquisition. The factory is ignored when an instance already exists.
    pub fn acquire<F>(key: &str, factory: F) -> Arc<dyn MqClient>
    where
        F: FnOnce() -> Arc<dyn MqClient>,
    {
        let mut registry = registry().lock();
        let entry = registry.entry(key.to_string()).or_insert_with(|| Entry {
            client: factory(),
            consumers: 0,
        });
        entry.consumers += 1;
        Arc::clone(&entry.client)
    }

    /// Drop one reference to the client for `key`. Returns the client when
    /// the last reference was released, so the caller can close it.
    pub fn release(key: &str) -> Option<Arc<dyn MqClient>> {
        let mut registry = registry().lock();
        let entry = registry.get_mut(key)?;
        entry.consumers = entry.consumers.saturating_sub(1);
        if entry.consumers == 0 {
            registry.remove(key).map(|e| e.client)
        } else {
            None
        }
    }
}

/// Convenience alias used throughout the consumer internals
pub type SharedMqClient = Arc<dyn MqClient>;
