//! Message delivery contract
//!
//! Batches are handed to user code together with an [`AckHandle`]; the pull
//! worker holds the queue's offset until the handle fires. Dropping the
//! handle without acknowledging counts as a failure: the offset stays put
//! and the batch is re-delivered later (at-least-once).

use crate::message::MessageExt;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Completion handle for one delivered batch.
pub struct AckHandle {
    tx: oneshot::Sender<()>,
}

impl AckHandle {
    pub(crate) fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx }
    }

    /// Acknowledge the batch; consumes the handle.
    pub fn ack(self) {
        let _ = self.tx.send(());
    }
}

/// User message-handling code.
///
/// `consume` receives one batch in broker-assigned offset order. The worker
/// does not issue the next pull for the queue until the handle is acked (or
/// the ack timeout fires), so acking late throttles that queue only. A
/// listener that needs to finish work after returning may move the handle
/// into a spawned task.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn consume(&self, messages: Vec<MessageExt>, ack: AckHandle);
}

struct AutoAckListener<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> MessageListener for AutoAckListener<F>
where
    F: Fn(Vec<MessageExt>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn consume(&self, messages: Vec<MessageExt>, ack: AckHandle) {
        (self.handler)(messages).await;
        ack.ack();
    }
}

/// Wrap a plain async handler into a listener that acknowledges as soon as
/// the handler returns. The explicit two-argument [`MessageListener`] form
/// is preferred for new code; this adapter accommodates handlers that have
/// no use for the handle.
pub fn auto_ack<F, Fut>(handler: F) -> Arc<dyn MessageListener>
where
    F: Fn(Vec<MessageExt>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(AutoAckListener { handler })
}
