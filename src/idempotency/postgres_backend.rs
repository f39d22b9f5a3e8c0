//! PostgreSQL idempotency backend.
//!
//! The `(caller_id, key)` primary key arbitrates concurrent reservations.
//! An expired row is taken over in place by the same upsert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::backend::{
    IdempotencyBackend, IdempotencyError, IdempotencyRecord, IdempotencyResult, Reservation,
};

const MAX_RESERVE_ROUNDS: usize = 3;

type RecordRow = (String, String, Uuid, String, DateTime<Utc>, DateTime<Utc>);

pub struct PostgresIdempotencyBackend {
    pool: PgPool,
}

impl PostgresIdempotencyBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_live(
        &self,
        caller_id: &str,
        key: &str,
    ) -> IdempotencyResult<Option<IdempotencyRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT caller_id, key, message_id, fingerprint, created_at, expires_at
            FROM idempotency_keys
            WHERE caller_id = $1 AND key = $2 AND expires_at > NOW()
            "#,
        )
        .bind(caller_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(caller_id, key, message_id, fingerprint, created_at, expires_at)| IdempotencyRecord {
                caller_id,
                key,
                message_id,
                fingerprint,
                created_at,
                expires_at,
            },
        ))
    }
}

#[async_trait]
impl IdempotencyBackend for PostgresIdempotencyBackend {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn reserve(&self, record: IdempotencyRecord) -> IdempotencyResult<Reservation> {
        for _ in 0..MAX_RESERVE_ROUNDS {
            let inserted: Option<(Uuid,)> = sqlx::query_as(
                r#"
                INSERT INTO idempotency_keys
                    (caller_id, key, message_id, fingerprint, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (caller_id, key) DO UPDATE
                SET message_id = EXCLUDED.message_id,
                    fingerprint = EXCLUDED.fingerprint,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at
                WHERE idempotency_keys.expires_at <= NOW()
                RETURNING message_id
                "#,
            )
            .bind(&record.caller_id)
            .bind(&record.key)
            .bind(record.message_id)
            .bind(&record.fingerprint)
            .bind(record.created_at)
            .bind(record.expires_at)
            .fetch_optional(&self.pool)
            .await?;

            if inserted.is_some() {
                return Ok(Reservation::Reserved);
            }

            // Released or purged between the upsert and the read: try again
            if let Some(existing) = self.find_live(&record.caller_id, &record.key).await? {
                return Ok(Reservation::Existing(existing));
            }
        }

        Err(IdempotencyError::Contended(record.key))
    }

    async fn release(
        &self,
        caller_id: &str,
        key: &str,
        message_id: Uuid,
    ) -> IdempotencyResult<()> {
        sqlx::query(
            "DELETE FROM idempotency_keys WHERE caller_id = $1 AND key = $2 AND message_id = $3",
        )
        .bind(caller_id)
        .bind(key)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_expired(&self, limit: usize) -> IdempotencyResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE (caller_id, key) IN (
                SELECT caller_id, key FROM idempotency_keys
                WHERE expires_at <= NOW()
                LIMIT $1
            )
            "#,
        )
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
