//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONCURRENCY_CONFLICTS_TOTAL, DISPATCH_ATTEMPTS_TOTAL, DISPATCH_LATENCY, EMAILS_ACCEPTED_TOTAL,
    EMAILS_REJECTED_TOTAL, EMAILS_REPLAYED_TOTAL, MESSAGES_RECLAIMED_TOTAL, QUEUE_DEPTH,
    RENDER_WARNINGS_TOTAL, RETENTION_PURGED_TOTAL, STATUS_TRANSITIONS_TOTAL, WEBHOOK_EVENTS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording accept-path metrics
pub struct AcceptMetrics;

impl AcceptMetrics {
    pub fn record_accepted() {
        EMAILS_ACCEPTED_TOTAL.inc();
    }

    /// Record a replay; `matched` is whether the request fingerprint matched the original
    pub fn record_replayed(matched: bool) {
        let label = if matched { "match" } else { "mismatch" };
        EMAILS_REPLAYED_TOTAL.with_label_values(&[label]).inc();
    }

    pub fn record_rejected(reason: &str) {
        EMAILS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Helper struct for recording render metrics
pub struct RenderMetrics;

impl RenderMetrics {
    pub fn record_warnings(count: usize) {
        if count > 0 {
            RENDER_WARNINGS_TOTAL.inc_by(count as u64);
        }
    }
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a transport attempt (`sent`, `retry`, `failed`)
    pub fn record_attempt(outcome: &str, latency_secs: f64) {
        DISPATCH_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
        DISPATCH_LATENCY.observe(latency_secs);
    }

    pub fn record_enqueued() {
        QUEUE_DEPTH.inc();
    }

    pub fn record_dequeued() {
        QUEUE_DEPTH.dec();
    }

    pub fn queue_depth() -> i64 {
        QUEUE_DEPTH.get()
    }

    pub fn record_conflict() {
        CONCURRENCY_CONFLICTS_TOTAL.inc();
    }
}

/// Helper struct for recording status transitions
pub struct StatusMetrics;

impl StatusMetrics {
    pub fn record_transition(status: &str) {
        STATUS_TRANSITIONS_TOTAL.with_label_values(&[status]).inc();
    }
}

/// Helper struct for recording webhook metrics
pub struct WebhookMetrics;

impl WebhookMetrics {
    /// Record one webhook item (`applied`, `recorded`, `duplicate`, `parked`, `unmatched`, `ignored`, `rejected`)
    pub fn record(provider: &str, result: &str) {
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[provider, result])
            .inc();
    }
}

/// Helper struct for background maintenance metrics
pub struct MaintenanceMetrics;

impl MaintenanceMetrics {
    pub fn record_reclaimed(count: usize) {
        MESSAGES_RECLAIMED_TOTAL.inc_by(count as u64);
    }

    /// Record purged rows (`messages`, `events`, `idempotency_keys`)
    pub fn record_purged(kind: &str, count: u64) {
        if count > 0 {
            RETENTION_PURGED_TOTAL.with_label_values(&[kind]).inc_by(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_prefix() {
        AcceptMetrics::record_accepted();
        StatusMetrics::record_transition("SENT");

        let text = encode_metrics().unwrap();
        assert!(text.contains("mailgate_emails_accepted_total"));
        assert!(text.contains("mailgate_status_transitions_total"));
    }
}
