//! Idempotency backend trait and shared types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from idempotency backends
#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Reservation for '{0}' kept changing, giving up")]
    Contended(String),
}

pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// One `(callerId, key)` reservation pointing at the message it created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub caller_id: String,
    pub key: String,
    pub message_id: Uuid,
    /// SHA-256 hex of the canonical request
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Expired records count as absent
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of trying to reserve a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The candidate record was stored; the caller owns the key
    Reserved,
    /// A live record already holds the key
    Existing(IdempotencyRecord),
}

/// Storage for idempotency reservations.
///
/// `reserve` must be atomic per `(caller_id, key)`: of two concurrent
/// reservations exactly one gets `Reserved`, the other sees its record.
#[async_trait]
pub trait IdempotencyBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Store `record` unless a live record holds its key.
    async fn reserve(&self, record: IdempotencyRecord) -> IdempotencyResult<Reservation>;

    /// Drop a reservation, but only while it still points at `message_id`.
    async fn release(&self, caller_id: &str, key: &str, message_id: Uuid)
        -> IdempotencyResult<()>;

    /// Delete up to `limit` expired records, returning how many were removed.
    async fn purge_expired(&self, limit: usize) -> IdempotencyResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let record = IdempotencyRecord {
            caller_id: "c".into(),
            key: "k".into(),
            message_id: Uuid::new_v4(),
            fingerprint: "f".into(),
            created_at: now - Duration::hours(1),
            expires_at: now,
        };
        assert!(record.is_expired(now));
        assert!(!record.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = IdempotencyRecord {
            caller_id: "c".into(),
            key: "k".into(),
            message_id: Uuid::nil(),
            fingerprint: "f".into(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("messageId").is_some());
        assert!(json.get("callerId").is_some());
    }
}
