//! Dispatch queue.
//!
//! The message store is the durable queue: a QUEUED message that is due
//! and unleased is work. The in-process channel only carries wake-ups so
//! workers do not poll; anything it drops (full channel, restart, lost
//! retry timer) is picked up again by the reclaimer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::message::{Message, MessageStore, StoreResult};
use crate::metrics::DispatchMetrics;

pub struct DispatchQueue {
    store: Arc<dyn MessageStore>,
    sender: mpsc::Sender<Uuid>,
    receiver: Mutex<mpsc::Receiver<Uuid>>,
}

impl DispatchQueue {
    pub fn new(store: Arc<dyn MessageStore>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            store,
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Persist a QUEUED message and wake a worker. Returns once the
    /// message is durable; delivery happens in the background.
    pub async fn enqueue(&self, message: &Message) -> StoreResult<()> {
        self.store.insert(message).await?;
        self.notify(message.message_id);
        tracing::debug!(
            message_id = %message.message_id,
            template_key = %message.template_key,
            "Message enqueued"
        );
        Ok(())
    }

    /// Hand a message id to the workers. Returns `false` when the channel
    /// is full or closed; the reclaimer recovers those messages.
    pub fn notify(&self, message_id: Uuid) -> bool {
        match self.sender.try_send(message_id) {
            Ok(()) => {
                DispatchMetrics::record_enqueued();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    message_id = %message_id,
                    "Dispatch channel full, message left for the reclaimer"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(message_id = %message_id, "Dispatch channel closed");
                false
            }
        }
    }

    /// Wake a worker for `message_id` after `delay`
    pub fn schedule_retry(self: &Arc<Self>, message_id: Uuid, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.notify(message_id);
        });
    }

    /// Next message id to work on; `None` once every sender is gone.
    pub async fn next(&self) -> Option<Uuid> {
        let id = self.receiver.lock().await.recv().await;
        if id.is_some() {
            DispatchMetrics::record_dequeued();
        }
        id
    }

    /// Wake-ups waiting in the channel
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}
