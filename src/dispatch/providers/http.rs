//! JSON-over-HTTP provider transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::dispatch::transport::{EmailTransport, OutboundEmail, SentEmail, TransportError};

/// HTTP provider configuration
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Name recorded on messages and used to route webhooks
    pub name: String,
    /// Send endpoint, e.g. `https://mail.example.com/v1/send`
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: Option<String>,
    message_id: Option<String>,
}

/// Posts rendered emails as JSON to a provider endpoint
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Permanent(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }
}

/// 408 and 429 are worth retrying, as is anything 5xx; other 4xx never succeed.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let detail = if body.is_empty() {
        format!("provider returned {}", status)
    } else {
        format!("provider returned {}: {}", status, body)
    };

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        TransportError::Retryable(detail)
    } else {
        TransportError::Permanent(detail)
    }
}

#[async_trait]
impl EmailTransport for HttpTransport {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, TransportError> {
        let mut request = self.client.post(&self.config.endpoint).json(email);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        tracing::debug!(
            message_id = %email.message_id,
            provider = %self.config.name,
            recipients = email.to.len(),
            "Posting email to provider"
        );

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &body);
            tracing::error!(
                message_id = %email.message_id,
                provider = %self.config.name,
                status = %status,
                retryable = error.is_retryable(),
                "Provider refused email"
            );
            return Err(error);
        }

        let header_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let provider_message_id = match header_id {
            Some(id) => id,
            None => {
                let body: SendResponse = response.json().await.map_err(|e| {
                    TransportError::Retryable(format!("unreadable provider response: {}", e))
                })?;
                body.message_id.or(body.id).ok_or_else(|| {
                    TransportError::Retryable("provider response carried no message id".into())
                })?
            }
        };

        tracing::info!(
            message_id = %email.message_id,
            provider = %self.config.name,
            provider_message_id = %provider_message_id,
            "Provider accepted email"
        );

        Ok(SentEmail {
            provider_message_id,
        })
    }
}
