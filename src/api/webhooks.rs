//! Provider webhook endpoint.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};

use crate::error::AppError;
use crate::server::AppState;
use crate::webhook::IngestSummary;

/// POST /webhooks/{provider} - Delivery events from an email provider
///
/// Unknown messages are acknowledged with 200 so the provider stops retrying.
#[tracing::instrument(name = "http.webhook", skip(state, body), fields(bytes = body.len()))]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Result<Json<IngestSummary>, AppError> {
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Webhook body is not JSON: {}", e)))?;

    let summary = state.ingestor.ingest(&provider, payload).await?;

    tracing::info!(
        provider = %provider,
        received = summary.received,
        applied = summary.applied,
        duplicates = summary.duplicates,
        parked = summary.parked,
        unmatched = summary.unmatched,
        rejected = summary.rejected,
        "Webhook batch processed"
    );

    Ok(Json(summary))
}
