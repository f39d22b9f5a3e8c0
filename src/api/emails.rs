//! Send and status-read endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::email::SendEmailRequest;
use crate::error::AppError;
use crate::message::MessageView;
use crate::server::middleware::caller_id;
use crate::server::AppState;

use super::extract::json_body;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const REPLAYED_HEADER: &str = "Idempotent-Replayed";

/// POST /emails - Accept an email for delivery
#[tracing::instrument(name = "http.send_email", skip(state, headers, payload))]
pub async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let caller = caller_id(&headers)?;
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| AppError::Validation("Idempotency-Key header is required".to_string()))?
        .to_str()
        .map_err(|_| AppError::Validation("Idempotency-Key must be visible ASCII".to_string()))?
        .to_string();
    let request = json_body(payload)?;

    let response = state.emails.send(&caller, &key, request).await?;
    let replayed = response.idempotent_replay;

    let mut http = (StatusCode::ACCEPTED, Json(response)).into_response();
    if replayed {
        http.headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    Ok(http)
}

/// GET /messages/{id} - Current status and provider events of a message
#[tracing::instrument(name = "http.get_message", skip(state, headers))]
pub async fn get_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageView>, AppError> {
    let caller = caller_id(&headers)?;
    let message_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::Validation(format!("Invalid message id: {}", id)))?;

    let message = state.messages.get(message_id).await?;
    // Other callers' messages are indistinguishable from missing ones
    if message.caller_id != caller {
        return Err(AppError::NotFound(format!("Message not found: {}", message_id)));
    }

    let events = state.messages.events(message_id).await?;
    Ok(Json(MessageView::new(message, events)))
}
