//! File-backed offset store for broadcast mode
//!
//! One JSON file per consumer group, `{base_dir}/{group}/offsets.json`,
//! holding `{queue key → offset}`. Writes go through a temp file, fsync and
//! rename so a crash mid-flush leaves the previous file intact.

use crate::error::{OffsetError, Result};
use crate::message::MessageQueue;
use crate::offset::{update_offset_table, OffsetStore, ReadOffsetType};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct OffsetSerializeWrapper {
    /// Keyed by the canonical `"topic@broker@id"` queue key
    offset_table: HashMap<String, i64>,
}

pub struct LocalFileOffsetStore {
    group: String,
    path: PathBuf,
    table: DashMap<MessageQueue, i64>,
}

impl LocalFileOffsetStore {
    pub fn new<P: AsRef<Path>>(base_dir: P, group: impl Into<String>) -> Self {
        let group = group.into();
        let path = base_dir.as_ref().join(&group).join("offsets.json");
        Self {
            group,
            path,
            table: DashMap::new(),
        }
    }

    fn read_wrapper(&self) -> Result<OffsetSerializeWrapper> {
        if !self.path.exists() {
            return Ok(OffsetSerializeWrapper::default());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            OffsetError::load(self.path.display().to_string(), e.to_string()).into()
        })
    }

    /// Serialize the whole table and atomically replace the offsets file.
    fn flush(&self) -> Result<()> {
        let mut wrapper = OffsetSerializeWrapper::default();
        for entry in self.table.iter() {
            wrapper.offset_table.insert(entry.key().key(), *entry.value());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&wrapper)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(
            group = %self.group,
            num_offsets = wrapper.offset_table.len(),
            path = %self.path.display(),
            "Flushed offsets"
        );
        Ok(())
    }
}

#[async_trait]
impl OffsetStore for LocalFileOffsetStore {
    async fn load(&self) -> Result<()> {
        let wrapper = self.read_wrapper()?;
        for (key, offset) in wrapper.offset_table {
            match MessageQueue::from_key(&key) {
                Some(mq) => {
                    self.table.insert(mq, offset);
                }
                None => warn!(group = %self.group, key = %key, "Skipping malformed offset key"),
            }
        }
        debug!(group = %self.group, num_offsets = self.table.len(), "Loaded offsets");
        Ok(())
    }

    async fn read_offset(&self, mq: &MessageQueue, read_type: ReadOffsetType) -> i64 {
        match read_type {
            ReadOffsetType::ReadFromMemory => {
                self.table.get(mq).map(|e| *e.value()).unwrap_or(-1)
            }
            ReadOffsetType::ReadFromStore => {
                let wrapper = match self.read_wrapper() {
                    Ok(w) => w,
                    Err(e) => {
                        warn!(group = %self.group, queue = %mq, error = %e, "Offset read failed");
                        return -1;
                    }
                };
                match wrapper.offset_table.get(&mq.key()) {
                    Some(&offset) => {
                        self.table.insert(mq.clone(), offset);
                        offset
                    }
                    None => -1,
                }
            }
            ReadOffsetType::MemoryFirstThenStore => {
                let from_memory = self.table.get(mq).map(|e| *e.value()).unwrap_or(-1);
                if from_memory >= 0 {
                    from_memory
                } else {
                    self.read_offset(mq, ReadOffsetType::ReadFromStore).await
                }
            }
        }
    }

    fn update_offset(&self, mq: &MessageQueue, offset: i64, increase_only: bool) {
        update_offset_table(&self.table, mq, offset, increase_only);
    }

    async fn persist(&self, mq: &MessageQueue) -> Result<()> {
        self.flush().map_err(|e| {
            crate::error::PushlineError::Offset(OffsetError::persist(mq.key(), e.to_string()))
        })
    }

    async fn persist_all(&self, _mqs: &[MessageQueue]) {
        // Whole-table flush: a superset of any requested subset, and the
        // natural retry for earlier failed writes.
        if let Err(e) = self.flush() {
            warn!(group = %self.group, error = %e, "Offset flush failed, will retry");
        }
    }

    fn remove_offset(&self, mq: &MessageQueue) {
        self.table.remove(mq);
    }

    fn offset_table_snapshot(&self) -> HashMap<MessageQueue, i64> {
        self.table
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}
