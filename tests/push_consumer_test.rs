//! End-to-end consumer scenarios against a scripted transport client

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{wait_until, MockMqClient};
use parking_lot::Mutex;
use pushline::consumer::{auto_ack, AckHandle, MessageListener};
use pushline::{
    ConsumeFromWhere, ConsumerConfig, ConsumerEvent, MessageExt, MessageQueue, PullResult,
    PullStatus, PushConsumer,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config(group: &str, instance: &str) -> ConsumerConfig {
    ConsumerConfig::builder(group)
        .instance_name(instance)
        .pull_interval_millis(10)
        .rebalance_interval_millis(100)
        .persist_offset_interval_millis(50)
        .build()
}

fn found(next_begin: i64, messages: Vec<MessageExt>) -> PullResult {
    PullResult::new(PullStatus::Found, next_begin).with_messages(messages)
}

fn msg(topic: &str, queue_id: i32, offset: i64, tags: Option<&str>) -> MessageExt {
    let mut m = MessageExt::new(topic, queue_id, offset, Bytes::from_static(b"payload"));
    m.tags = tags.map(str::to_string);
    m.msg_id = format!("{}-{}-{}", topic, queue_id, offset);
    m
}

/// Listener recording every delivered message, acking immediately.
fn recording_listener() -> (Arc<Mutex<Vec<MessageExt>>>, Arc<dyn MessageListener>) {
    let received: Arc<Mutex<Vec<MessageExt>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let listener = auto_ack(move |batch: Vec<MessageExt>| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().extend(batch);
        }
    });
    (received, listener)
}

fn collect_events(consumer: &PushConsumer) -> Arc<Mutex<Vec<ConsumerEvent>>> {
    let events: Arc<Mutex<Vec<ConsumerEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let mut rx = consumer.events();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            sink.lock().push(event);
        }
    });
    events
}

#[tokio::test(start_paused = true)]
async fn single_consumer_owns_all_queues_and_advances_offset() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 4)
            .with_consumer_ids(&["c1"]),
    );
    mock.script_pull("T", 0, found(1, vec![msg("T", 0, 0, None)]));

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-single", "i-single"), move || client).unwrap()
    };
    let (received, listener) = recording_listener();
    consumer.register_listener(listener);
    let events = collect_events(&consumer);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    // Exactly the 4 routed queues are owned and pulled.
    wait_until("4 queues owned", || consumer.owned_queues().len() == 4).await;
    wait_until("all queues pulled", || {
        let pulled: std::collections::HashSet<i32> =
            mock.pull_log_snapshot().iter().map(|h| h.queue_id).collect();
        pulled == (0..4).collect::<std::collections::HashSet<i32>>()
    })
    .await;

    // The message at offset 0 was delivered and acked; the offset store
    // observed offset 1.
    wait_until("message delivered", || received.lock().len() == 1).await;
    let queue0 = MessageQueue::new("T", "b", 0);
    wait_until("offset advanced in memory", || {
        consumer.offset_snapshot().get(&queue0) == Some(&1)
    })
    .await;
    // ...and the periodic flush pushed it to the broker store.
    wait_until("offset committed to broker", || {
        mock.committed_offset(&queue0) == Some(1)
    })
    .await;

    // A QueueChanged event was emitted for the first non-empty diff.
    assert!(events.lock().iter().any(|e| matches!(
        e,
        ConsumerEvent::QueueChanged { topic, queues } if topic == "T" && queues.len() == 4
    )));

    // Per-queue pull offsets never move backwards.
    for id in 0..4 {
        let offsets: Vec<i64> = mock
            .pull_log_snapshot()
            .iter()
            .filter(|h| h.queue_id == id)
            .map(|h| h.queue_offset)
            .collect();
        assert!(
            offsets.windows(2).all(|w| w[0] <= w[1]),
            "queue {} pulled backwards: {:?}",
            id,
            offsets
        );
    }

    // Startup registered the consumer, refreshed routes and heartbeated.
    use std::sync::atomic::Ordering;
    assert_eq!(mock.registrations.load(Ordering::SeqCst), 1);
    assert!(mock.route_refreshes.load(Ordering::SeqCst) >= 1);
    assert!(mock.heartbeats.load(Ordering::SeqCst) >= 1);

    consumer.shutdown().await;
    assert!(consumer.owned_queues().is_empty());
    assert_eq!(mock.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn two_consumers_split_queues_deterministically() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 4)
            .with_consumer_ids(&["c2", "c1"]),
    );

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-split", "i-split"), move || client).unwrap()
    };
    let (_received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    // Sorted cid list is ["c1", "c2"]; c1 is index 0 and owns queues 0, 1.
    wait_until("half the queues owned", || consumer.owned_queues().len() == 2).await;
    let mut owned = consumer.owned_queues();
    owned.sort();
    assert_eq!(
        owned,
        vec![MessageQueue::new("T", "b", 0), MessageQueue::new("T", "b", 1)]
    );

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offset_illegal_drops_queue_and_reseeds_from_store() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    mock.script_pull("T", 0, PullResult::new(PullStatus::OffsetIllegal, 100));

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-illegal", "i-illegal"), move || client).unwrap()
    };
    let (_received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    let queue0 = MessageQueue::new("T", "b", 0);
    // The corrected offset is written back and persisted before the queue
    // is released.
    wait_until("corrected offset committed", || {
        mock.committed_offset(&queue0) == Some(100)
    })
    .await;

    // A later rebalance re-adds the queue seeded from the store.
    wait_until("queue re-added at corrected offset", || {
        mock.pull_log_snapshot()
            .iter()
            .any(|h| h.queue_id == 0 && h.queue_offset == 100)
    })
    .await;

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rebalance_removes_queue_and_worker_exits() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    mock.script_pull("T", 0, found(1, vec![msg("T", 0, 0, None)]));

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-remove", "i-remove"), move || client).unwrap()
    };
    let (_received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    let queue0 = MessageQueue::new("T", "b", 0);
    wait_until("queue owned", || consumer.owned_queues().len() == 1).await;
    wait_until("offset advanced", || {
        consumer.offset_snapshot().get(&queue0) == Some(&1)
    })
    .await;

    // A new member sorts ahead of us; 1 queue over 2 members leaves us
    // with nothing.
    *mock.consumer_ids.write() = vec!["c0".to_string(), "c1".to_string()];
    consumer.on_consumer_ids_changed();

    wait_until("queue released", || consumer.owned_queues().is_empty()).await;
    // The consumed offset was persisted on release.
    assert_eq!(mock.committed_offset(&queue0), Some(1));

    // The worker is gone: no further pulls for the released queue.
    let pulls_after_release = mock.pull_count();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(mock.pull_count(), pulls_after_release);

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn first_time_seed_from_last_offset_starts_at_tail() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    mock.max_offsets
        .write()
        .insert(MessageQueue::new("T", "b", 0), 250);

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-tail", "i-tail"), move || client).unwrap()
    };
    let (_received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    // No committed offset exists, so CONSUME_FROM_LAST_OFFSET seeds at the
    // tail reported by the broker.
    wait_until("first pull at tail offset", || {
        mock.pull_log_snapshot()
            .first()
            .map(|h| h.queue_offset == 250)
            .unwrap_or(false)
    })
    .await;

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_topic_seeds_at_zero_under_last_offset() {
    let retry_topic = "%RETRY%g-retry";
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic(retry_topic, "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    // The tail would be 500; retry topics must ignore it and start at 0.
    mock.max_offsets
        .write()
        .insert(MessageQueue::new(retry_topic, "b", 0), 500);

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-retry", "i-retry"), move || client).unwrap()
    };
    let (_received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe(retry_topic, "*").unwrap();
    consumer.start().await.unwrap();

    wait_until("retry queue pulled from zero", || {
        mock.pull_log_snapshot()
            .first()
            .map(|h| h.queue_offset == 0)
            .unwrap_or(false)
    })
    .await;

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn first_time_seed_from_timestamp_searches_broker() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    mock.search_results
        .write()
        .insert(MessageQueue::new("T", "b", 0), 77);

    let config = ConsumerConfig::builder("g-ts")
        .instance_name("i-ts")
        .consume_from_where(ConsumeFromWhere::Timestamp)
        .consume_timestamp("20260101120000")
        .pull_interval_millis(10)
        .rebalance_interval_millis(100)
        .persist_offset_interval_millis(50)
        .build();
    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(config, move || client).unwrap()
    };
    let (_received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    wait_until("first pull at searched offset", || {
        mock.pull_log_snapshot()
            .first()
            .map(|h| h.queue_offset == 77)
            .unwrap_or(false)
    })
    .await;

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tag_filter_drops_unsubscribed_messages() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    mock.script_pull(
        "T",
        0,
        found(
            4,
            vec![
                msg("T", 0, 0, Some("TagA")),
                msg("T", 0, 1, Some("TagC")),
                msg("T", 0, 2, Some("TagB")),
                msg("T", 0, 3, None),
            ],
        ),
    );

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-tags", "i-tags"), move || client).unwrap()
    };
    let (received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "TagA || TagB").unwrap();
    consumer.start().await.unwrap();

    wait_until("filtered messages delivered", || received.lock().len() == 2).await;
    let tags: Vec<Option<String>> = received.lock().iter().map(|m| m.tags.clone()).collect();
    assert_eq!(
        tags,
        vec![Some("TagA".to_string()), Some("TagB".to_string())]
    );

    // Offset advanced past the last acked message.
    let queue0 = MessageQueue::new("T", "b", 0);
    wait_until("offset past acked batch", || {
        consumer
            .offset_snapshot()
            .get(&queue0)
            .map(|&o| o >= 3)
            .unwrap_or(false)
    })
    .await;

    consumer.shutdown().await;
    // Nothing outside the subscribed tag set was ever delivered.
    assert!(received
        .lock()
        .iter()
        .all(|m| matches!(m.tags.as_deref(), Some("TagA") | Some("TagB"))));
}

#[tokio::test(start_paused = true)]
async fn unacked_delivery_does_not_advance_offset() {
    struct NeverAck;

    #[async_trait]
    impl MessageListener for NeverAck {
        async fn consume(&self, _messages: Vec<MessageExt>, _ack: AckHandle) {
            // drop the handle: this batch is never acknowledged
        }
    }

    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    mock.script_pull("T", 0, found(1, vec![msg("T", 0, 0, None)]));

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-noack", "i-noack"), move || client).unwrap()
    };
    consumer.register_listener(Arc::new(NeverAck));
    let events = collect_events(&consumer);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    // The delivery timeout surfaces on the error funnel...
    wait_until("delivery timeout reported", || {
        events.lock().iter().any(|e| {
            matches!(e, ConsumerEvent::Error(msg) if msg.contains("not acknowledged"))
        })
    })
    .await;

    // ...and the consumed offset never moved past the unacked message:
    // position 0 still points at it, so it will be re-delivered.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let queue0 = MessageQueue::new("T", "b", 0);
    let in_memory = consumer.offset_snapshot().get(&queue0).copied();
    assert!(
        in_memory.is_none() || in_memory == Some(0),
        "offset advanced past unacked message: {:?}",
        in_memory
    );
    let committed = mock.committed_offset(&queue0);
    assert!(
        committed.is_none() || committed == Some(0),
        "committed offset advanced past unacked message: {:?}",
        committed
    );

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pull_errors_back_off_and_recover() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    *mock.fail_pulls.write() = true;

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-err", "i-err"), move || client).unwrap()
    };
    let (received, listener) = recording_listener();
    consumer.register_listener(listener);
    let events = collect_events(&consumer);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    wait_until("transport error reported", || {
        events.lock().iter().any(|e| {
            matches!(e, ConsumerEvent::Error(msg) if msg.contains("connection refused"))
        })
    })
    .await;

    // Broker comes back; the worker resumes and delivers.
    *mock.fail_pulls.write() = false;
    mock.script_pull("T", 0, found(1, vec![msg("T", 0, 0, None)]));
    wait_until("delivery after recovery", || received.lock().len() == 1).await;

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn broadcast_mode_owns_everything_and_persists_locally() {
    let dir = tempfile::tempdir().unwrap();

    let mock = Arc::new(MockMqClient::new("c1").with_topic("T", "b", 2));
    mock.script_pull("T", 0, found(1, vec![msg("T", 0, 0, None)]));

    let config = ConsumerConfig::builder("g-bcast")
        .instance_name("i-bcast")
        .broadcast(true)
        .offset_store_dir(dir.path())
        .pull_interval_millis(10)
        .rebalance_interval_millis(100)
        .persist_offset_interval_millis(50)
        .build();
    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(config, move || client).unwrap()
    };
    let (received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "*").unwrap();
    consumer.start().await.unwrap();

    // Broadcast mode: the whole queue set is owned regardless of the group
    // member list (which is empty here).
    wait_until("both queues owned", || consumer.owned_queues().len() == 2).await;
    wait_until("message delivered", || received.lock().len() == 1).await;

    let offsets_file = dir.path().join("g-bcast").join("offsets.json");
    wait_until("offsets file flushed", || offsets_file.exists()).await;
    consumer.shutdown().await;

    let content = std::fs::read_to_string(&offsets_file).unwrap();
    assert!(content.contains("T@b@0"), "offsets file: {}", content);

    // A restarted consumer resumes from the persisted offset, not from
    // scratch: at-least-once across restarts.
    let mock2 = Arc::new(MockMqClient::new("c1").with_topic("T", "b", 2));
    let config2 = ConsumerConfig::builder("g-bcast")
        .instance_name("i-bcast-2")
        .broadcast(true)
        .offset_store_dir(dir.path())
        .pull_interval_millis(10)
        .rebalance_interval_millis(100)
        .persist_offset_interval_millis(50)
        .build();
    let consumer2 = {
        let client = common::shared(&mock2);
        PushConsumer::new(config2, move || client).unwrap()
    };
    let (_received2, listener2) = recording_listener();
    consumer2.register_listener(listener2);
    consumer2.subscribe("T", "*").unwrap();
    consumer2.start().await.unwrap();

    wait_until("restart resumes from persisted offset", || {
        mock2
            .pull_log_snapshot()
            .iter()
            .any(|h| h.queue_id == 0 && h.queue_offset == 1)
    })
    .await;

    consumer2.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pull_header_carries_subscription_and_commit_offset() {
    let mock = Arc::new(
        MockMqClient::new("c1")
            .with_topic("T", "b", 1)
            .with_consumer_ids(&["c1"]),
    );
    mock.script_pull("T", 0, found(1, vec![msg("T", 0, 0, Some("TagA"))]));

    let consumer = {
        let client = common::shared(&mock);
        PushConsumer::new(test_config("g-header", "i-header"), move || client).unwrap()
    };
    let (received, listener) = recording_listener();
    consumer.register_listener(listener);
    consumer.subscribe("T", "TagA").unwrap();
    consumer.start().await.unwrap();

    wait_until("message delivered", || received.lock().len() == 1).await;
    // After the ack the in-memory offset is 1; a later pull carries it as
    // the piggybacked commit offset with the COMMIT_OFFSET bit set.
    wait_until("commit offset piggybacked", || {
        mock.pull_log_snapshot().iter().any(|h| {
            h.commit_offset == 1
                && pushline::protocol::sys_flag::has_commit_offset(h.sys_flag)
        })
    })
    .await;

    let log = mock.pull_log_snapshot();
    let first = log.first().unwrap();
    assert_eq!(first.consumer_group, "g-header");
    assert_eq!(first.topic, "T");
    assert_eq!(first.max_msg_nums, 32);
    assert_eq!(first.suspend_timeout_millis, 15_000);
    assert_eq!(first.subscription.as_deref(), Some("TagA"));
    assert!(pushline::protocol::sys_flag::has_suspend(first.sys_flag));
    assert!(pushline::protocol::sys_flag::has_subscription(first.sys_flag));
    // Nothing consumed yet on the very first pull: no committable offset.
    assert!(!pushline::protocol::sys_flag::has_commit_offset(first.sys_flag));

    consumer.shutdown().await;
}
