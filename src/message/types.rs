//! Message and provider event types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from message stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    NotFound(Uuid),

    #[error("Message already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Version conflict on message {0}")]
    Conflict(Uuid),

    #[error("Message {0} kept changing under concurrent writers")]
    ConflictRetriesExhausted(Uuid),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt message record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Bounced,
    Failed,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 5] = [
        MessageStatus::Queued,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Bounced,
        MessageStatus::Failed,
    ];

    /// Terminal statuses absorb every later event
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered | MessageStatus::Bounced | MessageStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Queued => "QUEUED",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Bounced => "BOUNCED",
            MessageStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", s)))
    }
}

/// Normalized provider event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Processed,
    Deferred,
    Delivered,
    Bounced,
    Failed,
    Opened,
    Clicked,
}

impl EventType {
    /// The terminal status this event drives a message to, if any
    pub fn target_status(self) -> Option<MessageStatus> {
        match self {
            EventType::Delivered => Some(MessageStatus::Delivered),
            EventType::Bounced => Some(MessageStatus::Bounced),
            EventType::Failed => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    pub fn is_engagement(self) -> bool {
        matches!(self, EventType::Opened | EventType::Clicked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Processed => "processed",
            EventType::Deferred => "deferred",
            EventType::Delivered => "delivered",
            EventType::Bounced => "bounced",
            EventType::Failed => "failed",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            EventType::Processed,
            EventType::Deferred,
            EventType::Delivered,
            EventType::Bounced,
            EventType::Failed,
            EventType::Opened,
            EventType::Clicked,
        ]
        .into_iter()
        .find(|event| event.as_str() == s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown event type '{}'", s)))
    }
}

/// Durable record of one send request's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: Uuid,
    pub caller_id: String,
    pub idempotency_key: String,
    pub template_key: String,
    /// Requested locale; `None` renders the base structure
    pub locale: Option<String>,
    pub recipients: Vec<String>,
    pub from: String,
    /// Subject line before interpolation
    pub subject: String,
    pub variables: serde_json::Value,
    pub metadata: serde_json::Value,
    pub status: MessageStatus,
    pub attempts: u32,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub last_error: Option<String>,
    /// Earliest time a worker may attempt delivery
    pub next_attempt_at: DateTime<Utc>,
    /// A worker holds the message until this time
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Bumped by every store write; compare-and-swap guard
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Whether a worker lease is still live at `now`
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|until| until > now)
    }

    /// QUEUED, due, unleased and untouched since `stale_before`
    pub fn is_stuck(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Queued
            && self.next_attempt_at <= now
            && self.updated_at <= stale_before
            && !self.is_leased(now)
    }
}

/// Immutable audit record of one provider notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub id: Uuid,
    pub message_id: Uuid,
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: EventType,
    pub raw_payload: serde_json::Value,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Whether this event changed the message status
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

/// How a webhook event names its message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRef {
    Id(Uuid),
    ProviderMessageId(String),
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRef::Id(id) => write!(f, "{}", id),
            MessageRef::ProviderMessageId(pid) => write!(f, "provider:{}", pid),
        }
    }
}

/// Normalized webhook event, ready for the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub provider: String,
    pub message: MessageRef,
    pub event_type: EventType,
    pub provider_event_id: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
}

impl InboundEvent {
    pub fn into_record(self, message_id: Uuid, applied: bool) -> ProviderEvent {
        ProviderEvent {
            id: Uuid::new_v4(),
            message_id,
            provider: self.provider,
            provider_event_id: self.provider_event_id,
            event_type: self.event_type,
            raw_payload: self.raw_payload,
            occurred_at: self.occurred_at,
            applied,
            created_at: Utc::now(),
        }
    }
}

/// Message counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub queued: u64,
    pub sent: u64,
    pub delivered: u64,
    pub bounced: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: MessageStatus, count: u64) {
        let slot = match status {
            MessageStatus::Queued => &mut self.queued,
            MessageStatus::Sent => &mut self.sent,
            MessageStatus::Delivered => &mut self.delivered,
            MessageStatus::Bounced => &mut self.bounced,
            MessageStatus::Failed => &mut self.failed,
        };
        *slot += count;
    }

    pub fn total(&self) -> u64 {
        self.queued + self.sent + self.delivered + self.bounced + self.failed
    }
}

/// Rows removed by one retention batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub messages: u64,
    pub events: u64,
}

/// Message as returned by the status-read endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub message_id: Uuid,
    pub status: MessageStatus,
    pub template_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub recipients: Vec<String>,
    pub from: String,
    pub subject: String,
    pub idempotency_key: String,
    pub attempts: u32,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub events: Vec<ProviderEvent>,
}

impl MessageView {
    pub fn new(message: Message, events: Vec<ProviderEvent>) -> Self {
        let next_attempt_at =
            (message.status == MessageStatus::Queued).then_some(message.next_attempt_at);
        Self {
            message_id: message.message_id,
            status: message.status,
            template_key: message.template_key,
            locale: message.locale,
            recipients: message.recipients,
            from: message.from,
            subject: message.subject,
            idempotency_key: message.idempotency_key,
            attempts: message.attempts,
            provider: message.provider,
            provider_message_id: message.provider_message_id,
            last_error: message.last_error,
            next_attempt_at,
            metadata: message.metadata,
            created_at: message.created_at,
            updated_at: message.updated_at,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in MessageStatus::ALL {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<MessageStatus>().is_err());
        assert_eq!(
            serde_json::to_value(MessageStatus::Delivered).unwrap(),
            serde_json::json!("DELIVERED")
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!MessageStatus::Queued.is_terminal());
        assert!(!MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::Delivered.is_terminal());
        assert!(MessageStatus::Bounced.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
    }

    #[test]
    fn test_event_targets() {
        assert_eq!(EventType::Delivered.target_status(), Some(MessageStatus::Delivered));
        assert_eq!(EventType::Opened.target_status(), None);
        assert!(EventType::Clicked.is_engagement());
        assert!(!EventType::Deferred.is_engagement());
        assert_eq!("bounced".parse::<EventType>().unwrap(), EventType::Bounced);
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(MessageStatus::Queued, 2);
        counts.add(MessageStatus::Failed, 1);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.queued, 2);
    }
}
