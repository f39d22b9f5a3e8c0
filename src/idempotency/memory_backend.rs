//! In-memory idempotency backend.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::backend::{IdempotencyBackend, IdempotencyRecord, IdempotencyResult, Reservation};

/// Reservations keyed by `(caller_id, key)`; the entry API makes reserve atomic.
#[derive(Default)]
pub struct MemoryIdempotencyBackend {
    records: DashMap<(String, String), IdempotencyRecord>,
}

impl MemoryIdempotencyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyBackend for MemoryIdempotencyBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn reserve(&self, record: IdempotencyRecord) -> IdempotencyResult<Reservation> {
        let now = Utc::now();
        let slot = (record.caller_id.clone(), record.key.clone());

        match self.records.entry(slot) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired(now) {
                    existing.insert(record);
                    Ok(Reservation::Reserved)
                } else {
                    Ok(Reservation::Existing(existing.get().clone()))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(Reservation::Reserved)
            }
        }
    }

    async fn release(
        &self,
        caller_id: &str,
        key: &str,
        message_id: Uuid,
    ) -> IdempotencyResult<()> {
        self.records.remove_if(&(caller_id.to_string(), key.to_string()), |_, record| {
            record.message_id == message_id
        });
        Ok(())
    }

    async fn purge_expired(&self, limit: usize) -> IdempotencyResult<u64> {
        let now = Utc::now();
        let expired: Vec<(String, String)> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .take(limit)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for slot in expired {
            if self
                .records
                .remove_if(&slot, |_, record| record.is_expired(now))
                .is_some()
            {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn record(key: &str, ttl: Duration) -> IdempotencyRecord {
        let now = Utc::now();
        IdempotencyRecord {
            caller_id: "caller".into(),
            key: key.into(),
            message_id: Uuid::new_v4(),
            fingerprint: "fp".into(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[tokio::test]
    async fn test_first_reserve_wins() {
        let backend = MemoryIdempotencyBackend::new();
        let first = record("k1", Duration::hours(1));
        let second = record("k1", Duration::hours(1));

        assert_eq!(backend.reserve(first.clone()).await.unwrap(), Reservation::Reserved);
        assert_eq!(
            backend.reserve(second).await.unwrap(),
            Reservation::Existing(first)
        );
    }

    #[tokio::test]
    async fn test_expired_record_is_replaced() {
        let backend = MemoryIdempotencyBackend::new();
        backend
            .reserve(record("k1", Duration::seconds(-1)))
            .await
            .unwrap();

        let fresh = record("k1", Duration::hours(1));
        assert_eq!(backend.reserve(fresh).await.unwrap(), Reservation::Reserved);
    }

    #[tokio::test]
    async fn test_keys_scoped_by_caller() {
        let backend = MemoryIdempotencyBackend::new();
        let mine = record("k1", Duration::hours(1));
        let mut theirs = record("k1", Duration::hours(1));
        theirs.caller_id = "other".into();

        assert_eq!(backend.reserve(mine).await.unwrap(), Reservation::Reserved);
        assert_eq!(backend.reserve(theirs).await.unwrap(), Reservation::Reserved);
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn test_release_only_own_reservation() {
        let backend = MemoryIdempotencyBackend::new();
        let rec = record("k1", Duration::hours(1));
        backend.reserve(rec.clone()).await.unwrap();

        backend.release("caller", "k1", Uuid::new_v4()).await.unwrap();
        assert_eq!(backend.len(), 1);

        backend.release("caller", "k1", rec.message_id).await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_bounded() {
        let backend = MemoryIdempotencyBackend::new();
        for i in 0..5 {
            backend
                .reserve(record(&format!("old-{}", i), Duration::seconds(-10)))
                .await
                .unwrap();
        }
        backend
            .reserve(record("live", Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(backend.purge_expired(3).await.unwrap(), 3);
        assert_eq!(backend.purge_expired(10).await.unwrap(), 2);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reserve_single_winner() {
        let backend = Arc::new(MemoryIdempotencyBackend::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.reserve(record("race", Duration::hours(1))).await.unwrap()
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            if handle.await.unwrap() == Reservation::Reserved {
                reserved += 1;
            }
        }
        assert_eq!(reserved, 1);
    }
}
