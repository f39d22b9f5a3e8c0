use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::email::EmailError;
use crate::idempotency::IdempotencyError;
use crate::message::StoreError;
use crate::template::{FieldError, TemplateError};
use crate::webhook::WebhookError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Variables do not match the template schema")]
    SchemaValidation(Vec<FieldError>),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldError>,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

/// Server-side detail is only shown outside production
fn hide_in_production(detail: &str, generic: &str) -> String {
    if is_production() {
        generic.to_string()
    } else {
        detail.to_string()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let log_message = self.to_string();
        let (status, code, client_message, details) = match self {
            AppError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                hide_in_production(&e.to_string(), "Configuration error"),
                Vec::new(),
            ),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, Vec::new()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg, Vec::new())
            }
            AppError::SchemaValidation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "SCHEMA_VALIDATION_FAILED",
                "Variables do not match the template schema".to_string(),
                errors,
            ),
            AppError::InvalidExpression(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_EXPRESSION",
                msg,
                Vec::new(),
            ),
            AppError::TemplateNotFound(key) => (
                StatusCode::NOT_FOUND,
                "TEMPLATE_NOT_FOUND",
                format!("Template not found: {}", key),
                Vec::new(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, Vec::new()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, Vec::new()),
            AppError::Storage(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE_UNAVAILABLE",
                hide_in_production(&e, "Service temporarily unavailable"),
                Vec::new(),
            ),
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                hide_in_production(&e, "Internal server error"),
                Vec::new(),
            ),
        };

        // Always log the detailed error server-side
        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::debug!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound(key) => AppError::TemplateNotFound(key),
            TemplateError::AlreadyExists(_) => AppError::Conflict(err.to_string()),
            TemplateError::InvalidKey(_)
            | TemplateError::InvalidTemplate(_)
            | TemplateError::InvalidLocale(_) => AppError::Validation(err.to_string()),
            TemplateError::OverlayNotFound { .. } => AppError::NotFound(err.to_string()),
            TemplateError::Expression { .. } => AppError::InvalidExpression(err.to_string()),
            TemplateError::Storage(e) => AppError::Storage(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("Message not found: {}", id)),
            StoreError::AlreadyExists(_) => AppError::Conflict(err.to_string()),
            StoreError::Corrupt(_) | StoreError::Serialization(_) => {
                AppError::Internal(err.to_string())
            }
            StoreError::Conflict(_)
            | StoreError::ConflictRetriesExhausted(_)
            | StoreError::Postgres(_) => AppError::Storage(err.to_string()),
        }
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::InFlight(_) => AppError::Conflict(err.to_string()),
            EmailError::InvalidRequest(msg) => AppError::Validation(msg),
            EmailError::SchemaValidation(errors) => AppError::SchemaValidation(errors),
            EmailError::Template(e) => e.into(),
            EmailError::Idempotency(e) => e.into(),
            EmailError::Store(e) => e.into(),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Store(e) => e.into(),
            other => AppError::Validation(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ExpressionError;

    async fn body_of(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_schema_errors_carry_details() {
        let (status, body) = body_of(AppError::SchemaValidation(vec![FieldError {
            field: "user.name".into(),
            message: "is required".into(),
        }]))
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "SCHEMA_VALIDATION_FAILED");
        assert_eq!(body["error"]["details"][0]["field"], "user.name");
    }

    #[tokio::test]
    async fn test_template_error_mapping() {
        let (status, body) = body_of(TemplateError::NotFound("welcome".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "TEMPLATE_NOT_FOUND");
        assert!(body["error"].get("details").is_none());

        let expression = TemplateError::Expression {
            location: "subject".into(),
            source: ExpressionError::Unterminated { offset: 3 },
        };
        let (status, body) = body_of(expression.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "INVALID_EXPRESSION");

        let (status, _) = body_of(TemplateError::Storage("down".into()).into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_message_not_found() {
        let (status, body) = body_of(StoreError::NotFound(uuid::Uuid::nil()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
