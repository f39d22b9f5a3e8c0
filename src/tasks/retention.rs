use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;

use crate::config::RetentionConfig;
use crate::idempotency::IdempotencyGuard;
use crate::message::MessageStore;
use crate::metrics::MaintenanceMetrics;

/// Rows removed by one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub messages: u64,
    pub events: u64,
    pub parked_events: u64,
    pub idempotency_keys: u64,
}

/// Oldest timestamp kept by a `window_days` window. Windows reaching past
/// the representable range keep everything.
fn retention_cutoff(window_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(window_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Background task that bounds storage growth
pub struct RetentionTask {
    config: RetentionConfig,
    messages: Arc<dyn MessageStore>,
    idempotency: IdempotencyGuard,
    shutdown: broadcast::Receiver<()>,
}

impl RetentionTask {
    pub fn new(
        config: RetentionConfig,
        messages: Arc<dyn MessageStore>,
        idempotency: IdempotencyGuard,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            messages,
            idempotency,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(Duration::from_secs(
            self.config.interval_seconds.max(1),
        ));
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_seconds,
            window_days = self.config.window_days,
            batch_size = self.config.batch_size,
            "Retention task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Retention task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.purge_once().await;
                }
            }
        }

        tracing::info!("Retention task stopped");
    }

    /// Purge in batches until a batch comes back short. Errors end the
    /// sweep early; the next interval picks up where it stopped.
    pub async fn purge_once(&self) -> RetentionReport {
        let mut report = RetentionReport::default();
        let batch_size = self.config.batch_size.max(1);
        let cutoff = retention_cutoff(self.config.window_days, Utc::now());

        loop {
            match self.messages.purge_terminal_before(cutoff, batch_size).await {
                Ok(stats) => {
                    report.messages += stats.messages;
                    report.events += stats.events;
                    if stats.messages < batch_size as u64 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Message retention batch failed");
                    break;
                }
            }
        }

        loop {
            match self.messages.purge_parked_before(cutoff, batch_size).await {
                Ok(purged) => {
                    report.parked_events += purged;
                    if purged < batch_size as u64 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Parked event retention batch failed");
                    break;
                }
            }
        }

        loop {
            match self.idempotency.purge_expired(batch_size).await {
                Ok(purged) => {
                    report.idempotency_keys += purged;
                    if purged < batch_size as u64 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Idempotency retention batch failed");
                    break;
                }
            }
        }

        MaintenanceMetrics::record_purged("messages", report.messages);
        MaintenanceMetrics::record_purged("events", report.events);
        MaintenanceMetrics::record_purged("parked_events", report.parked_events);
        MaintenanceMetrics::record_purged("idempotency_keys", report.idempotency_keys);

        if report != RetentionReport::default() {
            tracing::info!(
                messages = report.messages,
                events = report.events,
                parked_events = report.parked_events,
                idempotency_keys = report.idempotency_keys,
                cutoff = %cutoff,
                "Retention sweep finished"
            );
        }

        report
    }
}
