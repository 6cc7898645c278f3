//! Queue ownership reconciliation
//!
//! A rebalance pass decides, topic by topic, which queues this client owns,
//! then reconciles the process-queue table against that assignment: dropped
//! rows get their offsets persisted and their workers exit; new rows get a
//! seed offset and a freshly spawned worker. Passes are serialized with each
//! other; pull workers keep running underneath.

use crate::config::ConsumeFromWhere;
use crate::consumer::inner::{ConsumerEvent, ConsumerInner};
use crate::consumer::process_queue::PullEntry;
use crate::consumer::pull;
use crate::message::MessageQueue;
use crate::offset::ReadOffsetType;
use crate::protocol::is_retry_topic;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct Rebalancer {
    inner: Arc<ConsumerInner>,
}

impl Rebalancer {
    pub fn new(inner: Arc<ConsumerInner>) -> Self {
        Self { inner }
    }

    /// Run one full pass over every subscribed topic.
    pub async fn do_rebalance(&self) {
        let _serialized = self.inner.rebalance_lock.lock().await;
        if !self.inner.is_running() {
            return;
        }

        let topics: Vec<String> = self
            .inner
            .subscriptions
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for topic in topics {
            self.rebalance_by_topic(&topic).await;
        }
    }

    async fn rebalance_by_topic(&self, topic: &str) {
        let mut mq_set = self.inner.client.topic_subscribe_info(topic);
        if mq_set.is_empty() {
            warn!(topic = %topic, "No route for subscribed topic, skipping rebalance");
            return;
        }

        let assigned = if self.inner.config.is_broadcast() {
            mq_set.sort();
            mq_set
        } else {
            let group = self.inner.group().to_string();
            let mut cids = match self
                .inner
                .client
                .find_consumer_id_list(topic, &group)
                .await
            {
                Ok(cids) => cids,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Consumer id lookup failed");
                    self.inner.emit_error(&e);
                    return;
                }
            };
            if cids.is_empty() {
                warn!(topic = %topic, group = %group, "Consumer id list is empty");
                return;
            }

            mq_set.sort();
            cids.sort();
            let allocator = self.inner.allocator.read().clone();
            let assigned =
                allocator.allocate(&group, &self.inner.client.client_id(), &mq_set, &cids);
            debug!(
                topic = %topic,
                strategy = allocator.name(),
                total = mq_set.len(),
                members = cids.len(),
                assigned = assigned.len(),
                "Allocated queues"
            );
            assigned
        };

        let changed = self.update_process_queue_table(topic, &assigned).await;
        if changed {
            info!(topic = %topic, queues = assigned.len(), "Owned queue set changed");
            self.inner.emit(ConsumerEvent::QueueChanged {
                topic: topic.to_string(),
                queues: assigned,
            });
        }
    }

    /// Reconcile the table for one topic against the new assignment.
    /// Returns whether anything was added or removed.
    async fn update_process_queue_table(&self, topic: &str, assigned: &[MessageQueue]) -> bool {
        let mut changed = false;
        let assigned_set: HashSet<&MessageQueue> = assigned.iter().collect();

        // Pass 1: drop rows this client no longer owns, and rows whose
        // worker has stalled.
        let current: Vec<(MessageQueue, Arc<PullEntry>)> = self
            .inner
            .table
            .iter()
            .filter(|e| e.key().topic == topic)
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (mq, entry) in current {
            if !assigned_set.contains(&mq) {
                entry.process_queue.mark_dropped();
                self.drop_queue(&mq, "unassigned").await;
                changed = true;
            } else if entry
                .process_queue
                .is_pull_expired(self.inner.config.pull_max_idle_millis)
            {
                entry.process_queue.mark_dropped();
                self.drop_queue(&mq, "pull expired").await;
                changed = true;
            }
        }

        // Pass 2: add newly assigned queues and spawn their workers.
        for mq in assigned {
            if self.inner.table.contains_key(mq) {
                continue;
            }
            let start_offset = self.compute_pull_from_where(mq).await;
            if start_offset < 0 {
                warn!(queue = %mq, "No start offset, queue skipped until next rebalance");
                continue;
            }

            let entry = Arc::new(PullEntry::new(mq.clone(), start_offset));
            // Guard against a concurrent add of the same queue.
            match self.inner.table.entry(mq.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&entry));
                }
            }
            info!(queue = %mq, start_offset, "Acquired queue");
            tokio::spawn(pull::run_pull_loop(Arc::clone(&self.inner), entry));
            changed = true;
        }

        changed
    }

    /// Persist and forget the offset of a queue being released, then delete
    /// its row. A failed persist still releases the queue (it is no longer
    /// ours either way) but is surfaced instead of swallowed.
    async fn drop_queue(&self, mq: &MessageQueue, reason: &str) {
        if let Err(e) = self.inner.offset_store.persist(mq).await {
            warn!(queue = %mq, error = %e, "Offset persist failed while releasing queue");
            self.inner.emit_error(&e);
        }
        self.inner.offset_store.remove_offset(mq);
        self.inner.table.remove(mq);
        self.inner.pull_from_which_node.remove(mq);
        info!(queue = %mq, reason, "Released queue");
    }

    /// Seed offset for a queue this client is about to own. `-1` means the
    /// queue is skipped this cycle and retried on the next rebalance.
    async fn compute_pull_from_where(&self, mq: &MessageQueue) -> i64 {
        let last_offset = self
            .inner
            .offset_store
            .read_offset(mq, ReadOffsetType::ReadFromStore)
            .await;
        if last_offset >= 0 {
            return last_offset;
        }

        match self.inner.config.consume_from_where {
            ConsumeFromWhere::LastOffset => {
                if is_retry_topic(&mq.topic) {
                    0
                } else {
                    self.inner.client.max_offset(mq).await.unwrap_or_else(|e| {
                        warn!(queue = %mq, error = %e, "Tail offset lookup failed");
                        -1
                    })
                }
            }
            ConsumeFromWhere::FirstOffset => 0,
            ConsumeFromWhere::Timestamp => {
                if is_retry_topic(&mq.topic) {
                    self.inner.client.max_offset(mq).await.unwrap_or_else(|e| {
                        warn!(queue = %mq, error = %e, "Tail offset lookup failed");
                        -1
                    })
                } else {
                    let timestamp = self.inner.config.consume_timestamp_millis();
                    self.inner
                        .client
                        .search_offset(mq, timestamp)
                        .await
                        .unwrap_or_else(|e| {
                            warn!(queue = %mq, timestamp, error = %e, "Offset search failed");
                            -1
                        })
                }
            }
        }
    }
}
