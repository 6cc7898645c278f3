//! Broker-backed offset store for cluster mode
//!
//! The broker holds the authoritative offsets; the in-memory table is a
//! write-through cache. `persist` pushes the cached value upstream,
//! `ReadFromStore` pulls the broker's value down and refreshes the cache.

use crate::client::SharedMqClient;
use crate::error::{OffsetError, Result};
use crate::message::MessageQueue;
use crate::offset::{update_offset_table, OffsetStore, ReadOffsetType};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct RemoteBrokerOffsetStore {
    group: String,
    client: SharedMqClient,
    table: DashMap<MessageQueue, i64>,
}

impl RemoteBrokerOffsetStore {
    pub fn new(group: impl Into<String>, client: SharedMqClient) -> Self {
        Self {
            group: group.into(),
            client,
            table: DashMap::new(),
        }
    }

    async fn fetch_from_broker(&self, mq: &MessageQueue) -> i64 {
        match self.client.query_consumer_offset(&self.group, mq).await {
            Ok(offset) if offset >= 0 => {
                self.table.insert(mq.clone(), offset);
                offset
            }
            Ok(_) => -1,
            Err(e) => {
                warn!(group = %self.group, queue = %mq, error = %e, "Offset query failed");
                -1
            }
        }
    }
}

#[async_trait]
impl OffsetStore for RemoteBrokerOffsetStore {
    async fn load(&self) -> Result<()> {
        // Nothing to pre-load: offsets are fetched per queue on first use.
        Ok(())
    }

    async fn read_offset(&self, mq: &MessageQueue, read_type: ReadOffsetType) -> i64 {
        match read_type {
            ReadOffsetType::ReadFromMemory => {
                self.table.get(mq).map(|e| *e.value()).unwrap_or(-1)
            }
            ReadOffsetType::ReadFromStore => self.fetch_from_broker(mq).await,
            ReadOffsetType::MemoryFirstThenStore => {
                let from_memory = self.table.get(mq).map(|e| *e.value()).unwrap_or(-1);
                if from_memory >= 0 {
                    from_memory
                } else {
                    self.fetch_from_broker(mq).await
                }
            }
        }
    }

    fn update_offset(&self, mq: &MessageQueue, offset: i64, increase_only: bool) {
        update_offset_table(&self.table, mq, offset, increase_only);
    }

    async fn persist(&self, mq: &MessageQueue) -> Result<()> {
        let offset = match self.table.get(mq) {
            Some(entry) => *entry.value(),
            None => return Ok(()),
        };
        self.client
            .update_consumer_offset(&self.group, mq, offset)
            .await
            .map_err(|e| {
                crate::error::PushlineError::Offset(OffsetError::persist(mq.key(), e.to_string()))
            })?;
        debug!(group = %self.group, queue = %mq, offset, "Committed offset to broker");
        Ok(())
    }

    async fn persist_all(&self, mqs: &[MessageQueue]) {
        for mq in mqs {
            if let Err(e) = self.persist(mq).await {
                warn!(group = %self.group, queue = %mq, error = %e, "Offset commit failed, will retry");
            }
        }
    }

    fn remove_offset(&self, mq: &MessageQueue) {
        // Only the local cache record: the broker keeps its copy for the
        // next owner of the queue.
        self.table.remove(mq);
    }

    fn offset_table_snapshot(&self) -> HashMap<MessageQueue, i64> {
        self.table
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}
