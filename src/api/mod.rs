//! API layer - HTTP endpoint handlers organized by domain.

mod emails;
mod extract;
mod health;
mod metrics;
mod routes;
mod template;
mod webhooks;

// Re-export all handlers for use in server/app.rs
pub use emails::{get_message, send_email, IDEMPOTENCY_KEY_HEADER, REPLAYED_HEADER};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use template::{
    create_template, delete_overlay, delete_template, get_overlay, get_template, list_overlays,
    list_templates, render_template, update_template, upsert_overlay, RenderPreviewRequest,
};
pub use webhooks::receive_webhook;
