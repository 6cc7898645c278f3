#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Pushline
//!
//! Pushline is the core of a push-style consumer client for a partitioned,
//! broker-backed message queue (a RocketMQ-compatible consumer). It
//! subscribes to topics, divides each topic's queues with the other members
//! of its consumer group, long-polls messages from the broker, delivers
//! them to user code with an explicit acknowledgement contract, and
//! checkpoints consumption progress.
//!
//! ## Guarantees
//!
//! - **At-least-once delivery**: offsets advance only after a batch is
//!   acknowledged; a crash or missed flush re-delivers, never loses.
//! - **Per-queue ordering**: one pull and one in-flight batch per queue,
//!   messages presented in broker offset order. No ordering across queues.
//! - **Deterministic allocation**: every group member runs the same pure
//!   strategy over identically sorted inputs, so each queue has exactly one
//!   owner at steady state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pushline::{auto_ack, ConsumerConfig, PushConsumer};
//!
//! let config = ConsumerConfig::builder("order-processors").build();
//! let consumer = PushConsumer::new(config, || my_remoting_client())?;
//! consumer.register_listener(auto_ack(|batch| async move {
//!     for message in batch {
//!         println!("{} @ {}", message.msg_id, message.queue_offset);
//!     }
//! }));
//! consumer.subscribe("orders", "TagA || TagB")?;
//! consumer.start().await?;
//! ```
//!
//! The transport itself (name-server lookups, heartbeats, the raw pull
//! RPC) lives behind the [`MqClient`] trait and is supplied by the caller.

pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod offset;
pub mod protocol;
pub mod subscription;

pub use client::{BrokerAddress, MqClient, SharedMqClient};
pub use config::{ConsumeFromWhere, ConsumerConfig, ConsumerConfigBuilder, MessageModel};
pub use consumer::{
    auto_ack, AckHandle, AllocateMessageQueueAveragely, AllocateMessageQueueStrategy,
    ConsumerEvent, MessageListener, PushConsumer,
};
pub use error::{PushlineError, Result};
pub use message::{MessageExt, MessageQueue, PullResult, PullStatus};
pub use offset::{LocalFileOffsetStore, OffsetStore, ReadOffsetType, RemoteBrokerOffsetStore};
pub use subscription::SubscriptionData;
