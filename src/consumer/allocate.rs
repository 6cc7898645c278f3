//! Queue allocation strategies for cluster mode
//!
//! Every member of a consumer group runs the same strategy over identically
//! sorted inputs and keeps only its own slice, so allocation must be a pure
//! function: same inputs, same partition, on every client.

use crate::message::MessageQueue;
use tracing::warn;

/// Deterministic split of a queue set across the client ids of a group.
///
/// Callers pass `mqs` sorted by `(topic, broker_name, queue_id)` and `cids`
/// in ASCII order; given identical inputs on every client, each queue is
/// assigned to exactly one client.
pub trait AllocateMessageQueueStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn allocate(
        &self,
        consumer_group: &str,
        current_cid: &str,
        mqs: &[MessageQueue],
        cids: &[String],
    ) -> Vec<MessageQueue>;
}

/// Averaged allocation: contiguous slices of near-equal size, with the
/// first `N mod M` clients taking one extra queue.
pub struct AllocateMessageQueueAveragely;

impl AllocateMessageQueueStrategy for AllocateMessageQueueAveragely {
    fn name(&self) -> &'static str {
        "AVG"
    }

    fn allocate(
        &self,
        consumer_group: &str,
        current_cid: &str,
        mqs: &[MessageQueue],
        cids: &[String],
    ) -> Vec<MessageQueue> {
        if current_cid.is_empty() || mqs.is_empty() || cids.is_empty() {
            return Vec::new();
        }
        let index = match cids.iter().position(|c| c == current_cid) {
            Some(i) => i,
            None => {
                warn!(
                    group = %consumer_group,
                    cid = %current_cid,
                    cid_list_size = cids.len(),
                    "Consumer id not in group member list, allocating nothing"
                );
                return Vec::new();
            }
        };

        let total = mqs.len();
        let members = cids.len();
        let rem = total % members;
        let avg = total / members;
        let size = avg + usize::from(index < rem);
        let start = index * avg + index.min(rem);
        let end = (start + size).min(total);

        mqs[start..end].to_vec()
    }
}
