//! Admission of send requests by idempotency key.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::backend::{
    IdempotencyBackend, IdempotencyRecord, IdempotencyResult, Reservation,
};

/// Outcome of [`IdempotencyGuard::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The key was free; the caller must create the message with this id
    Accepted { message_id: Uuid },
    /// A live record holds the key; answer with its message id
    Replayed {
        message_id: Uuid,
        fingerprint_matches: bool,
    },
}

impl Admission {
    pub fn message_id(&self) -> Uuid {
        match self {
            Admission::Accepted { message_id } | Admission::Replayed { message_id, .. } => {
                *message_id
            }
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Admission::Replayed { .. })
    }
}

/// SHA-256 hex of the request's canonical JSON (object keys sorted)
pub fn fingerprint<T: Serialize>(request: &T) -> String {
    let canonical = serde_json::to_vec(request).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// First committer wins: concurrent first-time requests race on the
/// backend reservation and every loser is told which message holds the key.
#[derive(Clone)]
pub struct IdempotencyGuard {
    backend: Arc<dyn IdempotencyBackend>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(backend: Arc<dyn IdempotencyBackend>, ttl_seconds: u64) -> Self {
        Self {
            backend,
            // TTLs beyond the representable range never expire
            ttl: i64::try_from(ttl_seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Reserve `key` for `caller_id` or report the message that already holds it.
    pub async fn admit(
        &self,
        caller_id: &str,
        key: &str,
        request_fingerprint: &str,
    ) -> IdempotencyResult<Admission> {
        let now = Utc::now();
        let record = IdempotencyRecord {
            caller_id: caller_id.to_string(),
            key: key.to_string(),
            message_id: Uuid::new_v4(),
            fingerprint: request_fingerprint.to_string(),
            created_at: now,
            expires_at: now
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let candidate = record.message_id;

        match self.backend.reserve(record).await? {
            Reservation::Reserved => Ok(Admission::Accepted {
                message_id: candidate,
            }),
            Reservation::Existing(existing) => {
                let fingerprint_matches = existing.fingerprint == request_fingerprint;
                if !fingerprint_matches {
                    tracing::warn!(
                        caller_id = %caller_id,
                        idempotency_key = %key,
                        message_id = %existing.message_id,
                        "Idempotency key reused with a different request; answering with the original message"
                    );
                }
                Ok(Admission::Replayed {
                    message_id: existing.message_id,
                    fingerprint_matches,
                })
            }
        }
    }

    /// Give the key back after the accept path failed for `message_id`.
    pub async fn release(&self, caller_id: &str, key: &str, message_id: Uuid) {
        if let Err(e) = self.backend.release(caller_id, key, message_id).await {
            tracing::error!(
                caller_id = %caller_id,
                idempotency_key = %key,
                message_id = %message_id,
                error = %e,
                "Failed to release idempotency key"
            );
        }
    }

    pub async fn purge_expired(&self, limit: usize) -> IdempotencyResult<u64> {
        self.backend.purge_expired(limit).await
    }
}
