use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use super::AppState;
use crate::error::AppError;

/// Header carrying the pre-validated caller identity
pub const CALLER_ID_HEADER: &str = "X-Caller-Id";

/// Caller used when no `X-Caller-Id` is sent
pub const DEFAULT_CALLER_ID: &str = "default";

const MAX_CALLER_ID_LEN: usize = 128;

/// API Key authentication middleware
/// Validates X-API-Key header against configured api.key
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // If no API key is configured, allow all requests (development mode)
    let Some(expected_key) = &state.settings.api.key else {
        return Ok(next.run(req).await);
    };

    // Check X-API-Key header
    let api_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    match api_key {
        Some(key) if key == expected_key => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(AppError::Auth("Invalid API key".to_string()))
        }
        None => {
            tracing::warn!("Missing API key header");
            Err(AppError::Auth("Missing X-API-Key header".to_string()))
        }
    }
}

/// Caller identity from `X-Caller-Id`, defaulting to `default`
pub fn caller_id(headers: &HeaderMap) -> Result<String, AppError> {
    let Some(value) = headers.get(CALLER_ID_HEADER) else {
        return Ok(DEFAULT_CALLER_ID.to_string());
    };

    let caller = value
        .to_str()
        .map_err(|_| AppError::Validation("X-Caller-Id must be visible ASCII".to_string()))?
        .trim();

    if caller.is_empty() || caller.len() > MAX_CALLER_ID_LEN {
        return Err(AppError::Validation(format!(
            "X-Caller-Id must be 1-{} characters",
            MAX_CALLER_ID_LEN
        )));
    }

    Ok(caller.to_string())
}
