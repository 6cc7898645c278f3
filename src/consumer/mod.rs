//! Push consumer core
//!
//! This module holds the three subsystems behind the façade: the rebalancer
//! that decides queue ownership, the per-queue pull workers, and the shared
//! runtime state they coordinate through.

pub mod allocate;
mod inner;
pub mod listener;
pub mod process_queue;
mod pull;
mod push_consumer;
mod rebalance;

pub use allocate::{AllocateMessageQueueAveragely, AllocateMessageQueueStrategy};
pub use inner::ConsumerEvent;
pub use listener::{auto_ack, AckHandle, MessageListener};
pub use process_queue::{ProcessQueue, PullEntry};
pub use push_consumer::PushConsumer;
