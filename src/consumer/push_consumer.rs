//! Push consumer façade
//!
//! Owns the shared state, drives lifecycle, and runs the two periodic tasks
//! (rebalance, offset flush). Everything else, from pulling to delivering
//! to reconciling ownership, happens in tasks this facade spawns.

use crate::client::{instances, MqClient, SharedMqClient};
use crate::config::{ConsumerConfig, MessageModel};
use crate::consumer::allocate::{AllocateMessageQueueAveragely, AllocateMessageQueueStrategy};
use crate::consumer::inner::{ConsumerEvent, ConsumerInner};
use crate::consumer::listener::MessageListener;
use crate::consumer::rebalance::Rebalancer;
use crate::error::{ConfigError, PushlineError, Result};
use crate::message::MessageQueue;
use crate::offset::{LocalFileOffsetStore, OffsetStore, RemoteBrokerOffsetStore};
use crate::subscription::SubscriptionData;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Push-style consumer: subscribes to topics, divides their queues with the
/// other members of its group, long-polls messages and delivers them to the
/// registered [`MessageListener`] with an at-least-once guarantee.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let consumer = PushConsumer::new(config, || my_remoting_client())?;
/// consumer.register_listener(auto_ack(|batch| async move { /* ... */ }));
/// consumer.subscribe("orders", "TagA || TagB")?;
/// consumer.start().await?;
/// // ...
/// consumer.shutdown().await;
/// ```
pub struct PushConsumer {
    inner: Arc<ConsumerInner>,
    instance_key: String,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PushConsumer {
    /// Validate the configuration and attach to the shared client instance
    /// for this process. Configuration errors are fatal here; nothing has
    /// touched the network yet.
    ///
    /// `client_factory` runs only when no client exists yet for this
    /// instance identity; otherwise the existing one is shared.
    pub fn new<F>(config: ConsumerConfig, client_factory: F) -> Result<Self>
    where
        F: FnOnce() -> SharedMqClient,
    {
        config.validate()?;

        let instance_key = config.effective_instance_name();
        let client = instances::acquire(&instance_key, client_factory);

        let offset_store: Arc<dyn OffsetStore> = match config.message_model {
            MessageModel::Broadcasting => Arc::new(LocalFileOffsetStore::new(
                &config.offset_store_dir,
                config.consumer_group.clone(),
            )),
            MessageModel::Clustering => Arc::new(RemoteBrokerOffsetStore::new(
                config.consumer_group.clone(),
                Arc::clone(&client),
            )),
        };

        let (events, _) = broadcast::channel(256);
        let inner = Arc::new(ConsumerInner {
            config,
            client,
            offset_store,
            subscriptions: DashMap::new(),
            table: DashMap::new(),
            pull_from_which_node: DashMap::new(),
            listener: RwLock::new(None),
            allocator: RwLock::new(Arc::new(AllocateMessageQueueAveragely)),
            events,
            running: AtomicBool::new(false),
            rebalance_lock: tokio::sync::Mutex::new(()),
        });

        Ok(Self {
            inner,
            instance_key,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn group(&self) -> &str {
        self.inner.group()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Register the delivery target. Must happen before `start`.
    pub fn register_listener(&self, listener: Arc<dyn MessageListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    /// Replace the queue allocation strategy (default: averaged).
    pub fn set_allocate_strategy(&self, strategy: Arc<dyn AllocateMessageQueueStrategy>) {
        *self.inner.allocator.write() = strategy;
    }

    /// Subscribe to `topic` with a tag expression (`*` for everything).
    /// Re-subscribing replaces the expression and bumps its version. On a
    /// running consumer this triggers an immediate route refresh, heartbeat
    /// and rebalance.
    pub fn subscribe(&self, topic: &str, expression: &str) -> Result<()> {
        let subscription = SubscriptionData::parse(topic, expression)?;
        self.inner
            .subscriptions
            .insert(topic.to_string(), subscription);
        info!(topic = %topic, expression = %expression, "Subscribed");

        if self.inner.is_running() {
            let inner = Arc::clone(&self.inner);
            let topic = topic.to_string();
            tokio::spawn(async move {
                if let Err(e) = inner.client.update_topic_route_info(&topic).await {
                    warn!(topic = %topic, error = %e, "Route refresh failed");
                    inner.emit_error(&e);
                }
                if let Err(e) = inner.client.send_heartbeat_to_all_broker().await {
                    warn!(error = %e, "Heartbeat failed");
                    inner.emit_error(&e);
                }
                Rebalancer::new(inner).do_rebalance().await;
            });
        }
        Ok(())
    }

    /// Subscribe to consumer notifications. Every call gets an independent
    /// receiver; lagging receivers lose old events, never block the core.
    pub fn events(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.inner.events.subscribe()
    }

    /// Queues this client currently owns.
    pub fn owned_queues(&self) -> Vec<MessageQueue> {
        self.inner.owned_queues()
    }

    /// Snapshot of the in-memory consumed offsets.
    pub fn offset_snapshot(&self) -> HashMap<MessageQueue, i64> {
        self.inner.offset_store.offset_table_snapshot()
    }

    /// Register with the shared client, wait for it to be ready, load the
    /// offset store, run the first rebalance and start the periodic tasks.
    pub async fn start(&self) -> Result<()> {
        if self.inner.current_listener().is_none() {
            return Err(ConfigError::missing("message listener").into());
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(PushlineError::Internal(
                "consumer already started".to_string(),
            ));
        }

        if let Err(e) = self.try_init().await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(
            group = %self.inner.group(),
            client_id = %self.inner.client.client_id(),
            model = ?self.inner.config.message_model,
            "Consumer started"
        );

        if let Err(e) = self.inner.client.update_all_topic_router_info().await {
            warn!(error = %e, "Initial route refresh failed");
            self.inner.emit_error(&e);
        }
        if let Err(e) = self.inner.client.send_heartbeat_to_all_broker().await {
            warn!(error = %e, "Initial heartbeat failed");
            self.inner.emit_error(&e);
        }

        Rebalancer::new(Arc::clone(&self.inner)).do_rebalance().await;

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_rebalance_timer());
        tasks.push(self.spawn_persist_timer());
        Ok(())
    }

    async fn try_init(&self) -> Result<()> {
        self.inner.client.register_consumer(self.inner.group()).await?;
        self.inner.client.ready().await?;
        self.inner.offset_store.load().await?;
        Ok(())
    }

    /// Hook for the broker's consumer-id-change notification: schedules an
    /// immediate rebalance.
    pub fn on_consumer_ids_changed(&self) {
        if !self.inner.is_running() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            Rebalancer::new(inner).do_rebalance().await;
        });
    }

    /// Cooperative shutdown: flush offsets, drop every owned queue so the
    /// workers exit on their next check, and release the shared client.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(group = %self.inner.group(), "Consumer shutting down");

        // Wait out any in-flight rebalance pass before touching its tables;
        // the next pass sees the cleared running flag at the gate and
        // returns without acquiring queues.
        let serialized = self.inner.rebalance_lock.lock().await;

        let owned = self.inner.owned_queues();
        self.inner.offset_store.persist_all(&owned).await;

        for entry in self.inner.table.iter() {
            entry.value().process_queue.mark_dropped();
        }
        self.inner.table.clear();
        self.inner.subscriptions.clear();
        self.inner.pull_from_which_node.clear();
        drop(serialized);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.inner.listener.write() = None;

        if let Err(e) = self.inner.client.unregister_consumer(self.inner.group()).await {
            warn!(error = %e, "Unregister failed during shutdown");
        }
        if let Some(client) = instances::release(&self.instance_key) {
            if let Err(e) = client.close().await {
                warn!(error = %e, "Client close failed during shutdown");
            }
        }
        info!(group = %self.inner.group(), "Consumer shut down");
    }

    /// Direct handle to the shared transport client.
    pub fn client(&self) -> &Arc<dyn MqClient> {
        &self.inner.client
    }

    fn spawn_rebalance_timer(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.rebalance_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately and start() already ran a pass.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !inner.is_running() {
                    break;
                }
                Rebalancer::new(Arc::clone(&inner)).do_rebalance().await;
            }
        })
    }

    fn spawn_persist_timer(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.persist_offset_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !inner.is_running() {
                    break;
                }
                let owned = inner.owned_queues();
                inner.offset_store.persist_all(&owned).await;
            }
        })
    }
}
