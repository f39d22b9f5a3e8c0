//! Request body helpers that report malformed input as `VALIDATION_ERROR`.

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::AppError;

/// Unwrap a JSON body, turning axum's rejection into a 400
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}
