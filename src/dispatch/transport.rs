//! Outbound provider transport abstraction.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Why a transport refused or failed to take an email
#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth trying again later (timeouts, 5xx, throttling, network)
    #[error("Transient provider failure: {0}")]
    Retryable(String),

    /// The provider will never accept this email
    #[error("Provider rejected email: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Retryable(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Retryable(err.to_string())
    }
}

/// Fully rendered email handed to a provider
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEmail {
    pub message_id: Uuid,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Provider acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub provider_message_id: String,
}

/// An outbound email provider
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Provider name recorded on messages and used to route webhooks
    fn name(&self) -> &str;

    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, TransportError>;
}
