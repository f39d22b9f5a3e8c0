//! Prometheus metrics for the email gateway.
//!
//! - Accept path (accepted, replayed, rejected sends)
//! - Rendering warnings
//! - Dispatch attempts, latency and queue depth
//! - Delivery status transitions and webhook ingestion
//! - Background maintenance (reclaimed messages, retention purges)

mod helpers;

pub use helpers::{
    encode_metrics, AcceptMetrics, DispatchMetrics, MaintenanceMetrics, RenderMetrics,
    StatusMetrics, WebhookMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "mailgate";

lazy_static! {
    // ============================================================================
    // Accept Metrics
    // ============================================================================

    /// Send requests accepted as new messages
    pub static ref EMAILS_ACCEPTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_emails_accepted_total", METRIC_PREFIX),
        "Send requests accepted as new messages"
    ).unwrap();

    /// Send requests answered from an existing idempotency record
    pub static ref EMAILS_REPLAYED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_emails_replayed_total", METRIC_PREFIX),
        "Send requests answered with an existing message id",
        &["fingerprint"]
    ).unwrap();

    /// Send requests rejected at accept time
    pub static ref EMAILS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_emails_rejected_total", METRIC_PREFIX),
        "Send requests rejected at accept time",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Render Metrics
    // ============================================================================

    /// Unresolved expressions rendered as empty strings
    pub static ref RENDER_WARNINGS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_render_warnings_total", METRIC_PREFIX),
        "Unresolved variables without fallback"
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Transport attempts by outcome
    pub static ref DISPATCH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_attempts_total", METRIC_PREFIX),
        "Transport attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Transport call latency in seconds
    pub static ref DISPATCH_LATENCY: Histogram = register_histogram!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Transport call latency in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Message ids waiting in the in-process dispatch channel
    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Message ids waiting in the dispatch channel"
    ).unwrap();

    /// Optimistic concurrency conflicts on message writes
    pub static ref CONCURRENCY_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_concurrency_conflicts_total", METRIC_PREFIX),
        "Message version conflicts retried"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Status transitions by target status
    pub static ref STATUS_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_status_transitions_total", METRIC_PREFIX),
        "Message status transitions by target status",
        &["status"]
    ).unwrap();

    /// Webhook events by ingestion result
    pub static ref WEBHOOK_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_webhook_events_total", METRIC_PREFIX),
        "Webhook events by ingestion result",
        &["provider", "result"]
    ).unwrap();

    // ============================================================================
    // Maintenance Metrics
    // ============================================================================

    /// Stuck QUEUED messages handed back to workers
    pub static ref MESSAGES_RECLAIMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_reclaimed_total", METRIC_PREFIX),
        "Stuck queued messages re-enqueued"
    ).unwrap();

    /// Rows removed by retention
    pub static ref RETENTION_PURGED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_retention_purged_total", METRIC_PREFIX),
        "Rows removed by the retention task",
        &["kind"]
    ).unwrap();
}
