use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::middleware::api_key_auth;
use crate::server::AppState;

use super::emails::{get_message, send_email};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::template::{
    create_template, delete_overlay, delete_template, get_overlay, get_template, list_overlays,
    list_templates, render_template, update_template, upsert_overlay,
};
use super::webhooks::receive_webhook;

pub fn api_routes(state: &AppState) -> Router<AppState> {
    // Caller-facing endpoints, behind the optional API key
    let protected = Router::new()
        .route("/emails", post(send_email))
        .route("/messages/{id}", get(get_message))
        .route("/templates", post(create_template).get(list_templates))
        .route(
            "/templates/{key}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/templates/{key}/locales", get(list_overlays))
        .route(
            "/templates/{key}/locales/{locale}",
            get(get_overlay).put(upsert_overlay).delete(delete_overlay),
        )
        .route("/templates/{key}/render", post(render_template))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Providers authenticate by URL, not API key
        .route("/webhooks/{provider}", post(receive_webhook))
        .merge(protected)
}
