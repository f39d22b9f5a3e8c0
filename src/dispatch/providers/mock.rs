//! Scripted transport for tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dispatch::transport::{EmailTransport, OutboundEmail, SentEmail, TransportError};

/// Scripted reply for one send
#[derive(Debug, Clone)]
pub enum MockReply {
    Accept,
    Retryable(String),
    Permanent(String),
}

/// Transport that replays a script of replies, then accepts everything.
/// Accepted emails are captured; provider message ids are `mock-1`, `mock-2`, ...
pub struct MockTransport {
    name: String,
    script: Mutex<VecDeque<MockReply>>,
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    calls: Mutex<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            name: "mock".to_string(),
            script: Mutex::new(replies.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
            calls: Mutex::new(0),
        }
    }

    /// Get all accepted emails
    pub async fn sent_emails(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Number of send calls, accepted or not
    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, TransportError> {
        *self.calls.lock().await += 1;

        let reply = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(MockReply::Accept);

        match reply {
            MockReply::Accept => {
                let mut sent = self.sent.lock().await;
                sent.push(email.clone());
                Ok(SentEmail {
                    provider_message_id: format!("mock-{}", sent.len()),
                })
            }
            MockReply::Retryable(error) => Err(TransportError::Retryable(error)),
            MockReply::Permanent(error) => Err(TransportError::Permanent(error)),
        }
    }
}
