//! Per-queue pull worker
//!
//! One task per owned queue: it long-polls the broker, delivers what
//! survives the tag filter, and advances the offset. The worker polls its
//! exit conditions before every pull (row gone from the table, drop flag
//! set, consumer stopped), so rebalance and shutdown never need to cancel
//! it from outside.

use crate::config::{OFFSET_ILLEGAL_BACKOFF_MILLIS, PULL_TIME_DELAY_MILLIS_FLOW_CONTROL};
use crate::consumer::inner::ConsumerInner;
use crate::consumer::listener::AckHandle;
use crate::consumer::process_queue::PullEntry;
use crate::error::{ClientError, PushlineError, Result};
use crate::message::{MessageExt, PullStatus};
use crate::offset::ReadOffsetType;
use crate::protocol::{sys_flag, PullMessageRequestHeader, MASTER_BROKER_ID};
use crate::subscription::SubscriptionData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

enum LoopControl {
    Continue,
    Exit,
}

pub(crate) async fn run_pull_loop(inner: Arc<ConsumerInner>, entry: Arc<PullEntry>) {
    let mq = entry.message_queue.clone();
    info!(queue = %mq, next_offset = entry.next_offset(), "Pull worker started");

    loop {
        if !inner.is_running() {
            break;
        }
        // The worker and its table row share a lifetime: a missing row, a
        // row replaced by a newer acquisition, or the drop flag all end it.
        match inner.table.get(&mq).map(|e| Arc::clone(e.value())) {
            None => break,
            Some(current) if !Arc::ptr_eq(&current, &entry) => break,
            Some(_) => {}
        }
        if entry.process_queue.is_dropped() {
            break;
        }

        match pull_once(&inner, &entry).await {
            Ok(LoopControl::Exit) => break,
            Ok(LoopControl::Continue) => {}
            Err(e) => {
                if !inner.is_running() {
                    break;
                }
                if !e.is_retriable() {
                    warn!(queue = %mq, error = %e, "Pull failed, stopping worker");
                    inner.emit_error(&e);
                    break;
                }
                warn!(
                    queue = %mq,
                    error = %e,
                    error_name = "MQConsumerPullMessageError",
                    "Pull failed, backing off"
                );
                inner.emit_error(&e);
                tokio::time::sleep(inner.config.pull_exception_delay()).await;
                continue;
            }
        }

        let interval = inner.config.pull_interval();
        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }
    }

    info!(queue = %mq, "Pull worker stopped");
}

async fn pull_once(inner: &Arc<ConsumerInner>, entry: &Arc<PullEntry>) -> Result<LoopControl> {
    let mq = &entry.message_queue;
    let pq = &entry.process_queue;
    pq.touch_pull();

    // Soft flow control: too many unacked messages cached for this queue.
    if pq.cached_msg_count() > inner.config.pull_threshold_for_queue as i64 {
        debug!(queue = %mq, cached = pq.cached_msg_count(), "Flow control, delaying pull");
        tokio::time::sleep(Duration::from_millis(PULL_TIME_DELAY_MILLIS_FLOW_CONTROL)).await;
        return Ok(LoopControl::Continue);
    }

    let subscription = match inner.subscriptions.get(&mq.topic) {
        Some(sub) => sub.value().clone(),
        None => {
            warn!(queue = %mq, "Subscription missing for owned queue, waiting");
            tokio::time::sleep(inner.config.pull_exception_delay()).await;
            return Ok(LoopControl::Continue);
        }
    };

    // Offset piggybacked for the broker-side store; broadcast mode commits
    // nothing upstream.
    let commit_offset = if inner.config.is_broadcast() {
        0
    } else {
        let from_memory = inner
            .offset_store
            .read_offset(mq, ReadOffsetType::ReadFromMemory)
            .await;
        from_memory.max(0)
    };

    let broker = resolve_broker(inner, mq).await?;

    let mut flag = sys_flag::build(
        commit_offset > 0,
        true,
        inner.config.post_subscription_when_pull,
        false,
    );
    if broker.slave {
        flag = sys_flag::clear_commit_offset(flag);
    }

    let header = PullMessageRequestHeader {
        consumer_group: inner.group().to_string(),
        topic: mq.topic.clone(),
        queue_id: mq.queue_id,
        queue_offset: entry.next_offset(),
        max_msg_nums: inner.config.pull_batch_size,
        sys_flag: flag,
        commit_offset,
        suspend_timeout_millis: inner.config.broker_suspend_max_time_millis,
        subscription: inner
            .config
            .post_subscription_when_pull
            .then(|| subscription.expression.clone()),
        sub_version: subscription.sub_version,
    };

    let result = inner
        .client
        .pull_message(&broker.addr, header, inner.config.pull_rpc_timeout())
        .await?;

    inner
        .pull_from_which_node
        .insert(mq.clone(), result.suggest_which_broker_id);

    // A result that raced a drop is discarded before any offset advance.
    if pq.is_dropped() {
        return Ok(LoopControl::Exit);
    }

    entry.set_next_offset(result.next_begin_offset);

    match result.pull_status {
        PullStatus::Found => {
            let filtered = filter_by_tags(&subscription, result.messages);
            if filtered.is_empty() {
                inner
                    .offset_store
                    .update_offset(mq, result.next_begin_offset, true);
            } else {
                deliver_batches(inner, entry, filtered).await?;
            }
            Ok(LoopControl::Continue)
        }
        PullStatus::NoNewMessage | PullStatus::NoMatchedMessage => {
            // Record progress past empty or fully filtered ranges.
            inner
                .offset_store
                .update_offset(mq, result.next_begin_offset, true);
            Ok(LoopControl::Continue)
        }
        PullStatus::OffsetIllegal => {
            warn!(
                queue = %mq,
                corrected_offset = result.next_begin_offset,
                "Offset out of range, dropping queue"
            );
            pq.mark_dropped();
            tokio::time::sleep(Duration::from_millis(OFFSET_ILLEGAL_BACKOFF_MILLIS)).await;

            inner
                .offset_store
                .update_offset(mq, result.next_begin_offset, false);
            if let Err(e) = inner.offset_store.persist(mq).await {
                warn!(queue = %mq, error = %e, "Offset persist failed after illegal offset");
                inner.emit_error(&e);
            }
            inner.offset_store.remove_offset(mq);
            inner.table.remove(mq);
            inner.pull_from_which_node.remove(mq);
            // A later rebalance may re-add the queue with a re-seeded offset.
            Ok(LoopControl::Exit)
        }
    }
}

/// Resolve the broker address for the queue, preferring the replica the
/// broker suggested last. An unknown address triggers one route refresh and
/// one retry before the pull is failed.
async fn resolve_broker(
    inner: &Arc<ConsumerInner>,
    mq: &crate::message::MessageQueue,
) -> Result<crate::client::BrokerAddress> {
    let broker_id = inner
        .pull_from_which_node
        .get(mq)
        .map(|e| *e.value())
        .unwrap_or(MASTER_BROKER_ID);

    if let Some(broker) = inner
        .client
        .find_broker_address_in_subscribe(&mq.broker_name, broker_id, false)
        .await
    {
        return Ok(broker);
    }

    inner.client.update_topic_route_info(&mq.topic).await?;
    inner
        .client
        .find_broker_address_in_subscribe(&mq.broker_name, broker_id, false)
        .await
        .ok_or_else(|| {
            PushlineError::Client(ClientError::broker_not_found(&mq.broker_name, broker_id))
        })
}

/// Keep only messages whose tag is subscribed. Match-all and class-filter
/// subscriptions pass everything through.
fn filter_by_tags(subscription: &SubscriptionData, messages: Vec<MessageExt>) -> Vec<MessageExt> {
    if subscription.is_sub_all() || subscription.class_filter_mode {
        return messages;
    }
    messages
        .into_iter()
        .filter(|m| subscription.matches_tag(m.tags.as_deref()))
        .collect()
}

/// Deliver in chunks of `consume_message_batch_max_size`, advancing the
/// consumed offset after each acknowledged chunk. An ack that does not
/// arrive in time fails the pull: the offset stays put and the tail of the
/// batch is re-delivered later.
async fn deliver_batches(
    inner: &Arc<ConsumerInner>,
    entry: &Arc<PullEntry>,
    messages: Vec<MessageExt>,
) -> Result<()> {
    let mq = &entry.message_queue;
    // The listener is only ever cleared by shutdown; a worker that finds it
    // gone is racing the close and should exit, not back off.
    let listener = inner
        .current_listener()
        .ok_or(PushlineError::ShuttingDown)?;
    let chunk_size = inner.config.consume_message_batch_max_size.max(1);

    for chunk in messages.chunks(chunk_size) {
        if entry.process_queue.is_dropped() {
            return Ok(());
        }
        let (first_offset, last_offset) = match (chunk.first(), chunk.last()) {
            (Some(first), Some(last)) => (first.queue_offset, last.queue_offset),
            _ => continue,
        };

        let (tx, rx) = oneshot::channel();
        entry.process_queue.add_cached(chunk.len());
        listener.consume(chunk.to_vec(), AckHandle::new(tx)).await;
        let acked = tokio::time::timeout(inner.config.consume_ack_timeout(), rx).await;
        entry.process_queue.sub_cached(chunk.len());

        match acked {
            Ok(Ok(())) => {
                if entry.process_queue.is_dropped() {
                    return Ok(());
                }
                inner.offset_store.update_offset(mq, last_offset + 1, false);
                debug!(queue = %mq, offset = last_offset + 1, "Batch acknowledged");
            }
            _ => {
                // Rewind the pull position to the unacked chunk so the same
                // worker re-delivers it after the back-off; the consumed
                // offset has not moved.
                entry.set_next_offset(first_offset);
                return Err(PushlineError::DeliveryTimeout {
                    queue: mq.key(),
                    timeout_millis: inner.config.consume_ack_timeout_millis,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(expr: &str) -> SubscriptionData {
        SubscriptionData::parse("t", expr).unwrap()
    }

    fn msg(offset: i64, tags: Option<&str>) -> MessageExt {
        let mut m = MessageExt::new("t", 0, offset, bytes::Bytes::new());
        m.tags = tags.map(str::to_string);
        m
    }

    #[test]
    fn test_filter_keeps_subscribed_tags() {
        let filtered = filter_by_tags(
            &sub("TagA || TagB"),
            vec![msg(0, Some("TagA")), msg(1, Some("TagC")), msg(2, None)],
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].queue_offset, 0);
    }

    #[test]
    fn test_filter_match_all_passes_everything() {
        let filtered = filter_by_tags(
            &sub("*"),
            vec![msg(0, Some("TagA")), msg(1, None)],
        );
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_filter_class_filter_passes_everything() {
        let mut s = sub("TagA");
        s.class_filter_mode = true;
        let filtered = filter_by_tags(&s, vec![msg(0, Some("TagZ"))]);
        assert_eq!(filtered.len(), 1);
    }
}
