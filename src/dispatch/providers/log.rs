//! Transport that logs emails instead of sending them

use async_trait::async_trait;
use uuid::Uuid;

use crate::dispatch::transport::{EmailTransport, OutboundEmail, SentEmail, TransportError};

pub struct LogTransport {
    name: String,
}

impl LogTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EmailTransport for LogTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, TransportError> {
        let provider_message_id = format!("log-{}", Uuid::new_v4());

        tracing::info!(
            message_id = %email.message_id,
            provider_message_id = %provider_message_id,
            from = %email.from,
            to = ?email.to,
            subject = %email.subject,
            html_bytes = email.html.len(),
            text_bytes = email.text.len(),
            "Email accepted by log transport"
        );

        Ok(SentEmail {
            provider_message_id,
        })
    }
}
