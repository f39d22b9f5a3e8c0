use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::config::DispatchConfig;
use crate::dispatch::DispatchQueue;
use crate::message::state_machine::time_before;
use crate::message::StoreResult;
use crate::metrics::MaintenanceMetrics;

/// Background task that re-enqueues stuck QUEUED messages
pub struct ReclaimTask {
    queue: Arc<DispatchQueue>,
    stale_after: Duration,
    interval: Duration,
    batch_size: usize,
    shutdown: broadcast::Receiver<()>,
}

impl ReclaimTask {
    pub fn new(
        config: &DispatchConfig,
        queue: Arc<DispatchQueue>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue,
            stale_after: Duration::from_secs(config.stale_after_seconds),
            interval: Duration::from_secs(config.reclaim_interval_seconds.max(1)),
            batch_size: config.reclaim_batch_size.max(1),
            shutdown,
        }
    }

    /// Run a sweep at startup, then one per interval until shutdown
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.as_secs(),
            "Reclaim task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Reclaim task received shutdown signal");
                    break;
                }
                // First tick fires immediately: recovers work left by a previous process
                _ = timer.tick() => {
                    if let Err(e) = self.reclaim_once().await {
                        tracing::error!(error = %e, "Reclaim sweep failed");
                    }
                }
            }
        }

        tracing::info!("Reclaim task stopped");
    }

    /// Hand every stuck message back to the workers. Returns how many were found.
    pub async fn reclaim_once(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let stale_before = time_before(now, self.stale_after);

        let stuck = self
            .queue
            .store()
            .stuck_messages(stale_before, now, self.batch_size)
            .await?;

        if stuck.is_empty() {
            return Ok(0);
        }

        let mut requeued = 0;
        for message_id in &stuck {
            if self.queue.notify(*message_id) {
                requeued += 1;
            }
        }

        MaintenanceMetrics::record_reclaimed(stuck.len());
        tracing::warn!(
            stuck = stuck.len(),
            requeued,
            "Reclaimed stuck messages"
        );

        Ok(stuck.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::state_machine::tests::queued_message;
    use crate::message::{MemoryMessageStore, MessageStatus, MessageStore};

    #[tokio::test]
    async fn test_reclaims_only_stale_due_messages() {
        let store = Arc::new(MemoryMessageStore::new());
        let queue = Arc::new(DispatchQueue::new(store.clone(), 16));

        let mut stale = queued_message();
        stale.updated_at = Utc::now() - chrono::Duration::seconds(600);
        store.insert(&stale).await.unwrap();

        let fresh = queued_message();
        store.insert(&fresh).await.unwrap();

        let mut leased = queued_message();
        leased.updated_at = Utc::now() - chrono::Duration::seconds(600);
        leased.lease_expires_at = Some(Utc::now() + chrono::Duration::seconds(60));
        store.insert(&leased).await.unwrap();

        let mut sent = queued_message();
        sent.status = MessageStatus::Sent;
        sent.updated_at = Utc::now() - chrono::Duration::seconds(600);
        store.insert(&sent).await.unwrap();

        let (_tx, rx) = broadcast::channel(1);
        let config = DispatchConfig {
            stale_after_seconds: 120,
            ..Default::default()
        };
        let task = ReclaimTask::new(&config, queue.clone(), rx);

        assert_eq!(task.reclaim_once().await.unwrap(), 1);
        assert_eq!(queue.next().await, Some(stale.message_id));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let store = Arc::new(MemoryMessageStore::new());
        let queue = Arc::new(DispatchQueue::new(store, 4));
        let (tx, rx) = broadcast::channel(1);
        let task = ReclaimTask::new(&DispatchConfig::default(), queue, rx);

        let handle = tokio::spawn(task.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
