//! PostgreSQL message store.
//!
//! Tables:
//! - `messages` - one row per message, `version` guards concurrent writers
//! - `provider_events` - append-only, unique per `(message_id, provider, provider_event_id)`
//! - `parked_events` - events waiting for their provider message id

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::store::{decide_ingest, record_transition, IngestOutcome, MessageStore};
use super::types::{
    InboundEvent, Message, MessageRef, ProviderEvent, PurgeStats, StatusCounts, StoreError,
    StoreResult,
};

const MESSAGE_COLUMNS: &str = "message_id, caller_id, idempotency_key, template_key, locale, \
     recipients, sender, subject, variables, metadata, status, attempts, provider, \
     provider_message_id, last_error, next_attempt_at, lease_expires_at, version, \
     created_at, updated_at";

const STUCK_FILTER: &str = "status = 'QUEUED' AND next_attempt_at <= $2 AND updated_at <= $1 \
     AND (lease_expires_at IS NULL OR lease_expires_at <= $2)";

fn message_from_row(row: &PgRow) -> StoreResult<Message> {
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("attempts")?;

    Ok(Message {
        message_id: row.try_get("message_id")?,
        caller_id: row.try_get("caller_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        template_key: row.try_get("template_key")?,
        locale: row.try_get("locale")?,
        recipients: serde_json::from_value(row.try_get("recipients")?)?,
        from: row.try_get("sender")?,
        subject: row.try_get("subject")?,
        variables: row.try_get("variables")?,
        metadata: row.try_get("metadata")?,
        status: status.parse()?,
        attempts: attempts.max(0) as u32,
        provider: row.try_get("provider")?,
        provider_message_id: row.try_get("provider_message_id")?,
        last_error: row.try_get("last_error")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> StoreResult<ProviderEvent> {
    let event_type: String = row.try_get("event_type")?;

    Ok(ProviderEvent {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        provider: row.try_get("provider")?,
        provider_event_id: row.try_get("provider_event_id")?,
        event_type: event_type.parse()?,
        raw_payload: row.try_get("raw_payload")?,
        occurred_at: row.try_get("occurred_at")?,
        applied: row.try_get("applied")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parked_from_row(row: &PgRow) -> StoreResult<InboundEvent> {
    let event_type: String = row.try_get("event_type")?;

    Ok(InboundEvent {
        provider: row.try_get("provider")?,
        message: MessageRef::ProviderMessageId(row.try_get("provider_message_id")?),
        event_type: event_type.parse()?,
        provider_event_id: row.try_get("provider_event_id")?,
        occurred_at: row.try_get("occurred_at")?,
        raw_payload: row.try_get("raw_payload")?,
    })
}

pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the referenced message row for the rest of the transaction
    async fn lock_message(
        tx: &mut Transaction<'_, Postgres>,
        provider: &str,
        reference: &MessageRef,
    ) -> StoreResult<Option<Message>> {
        let row = match reference {
            MessageRef::Id(id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM messages WHERE message_id = $1 FOR UPDATE",
                    MESSAGE_COLUMNS
                ))
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
            }
            MessageRef::ProviderMessageId(pid) => {
                sqlx::query(&format!(
                    "SELECT {} FROM messages WHERE provider = $1 AND provider_message_id = $2 \
                     LIMIT 1 FOR UPDATE",
                    MESSAGE_COLUMNS
                ))
                .bind(provider)
                .bind(pid)
                .fetch_optional(&mut **tx)
                .await?
            }
        };

        row.as_ref().map(message_from_row).transpose()
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, message: &Message) -> StoreResult<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO messages ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             ON CONFLICT (message_id) DO NOTHING",
            MESSAGE_COLUMNS
        ))
        .bind(message.message_id)
        .bind(&message.caller_id)
        .bind(&message.idempotency_key)
        .bind(&message.template_key)
        .bind(&message.locale)
        .bind(serde_json::to_value(&message.recipients)?)
        .bind(&message.from)
        .bind(&message.subject)
        .bind(&message.variables)
        .bind(&message.metadata)
        .bind(message.status.as_str())
        .bind(message.attempts as i32)
        .bind(&message.provider)
        .bind(&message.provider_message_id)
        .bind(&message.last_error)
        .bind(message.next_attempt_at)
        .bind(message.lease_expires_at)
        .bind(message.version)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(message.message_id));
        }

        Ok(())
    }

    async fn get(&self, message_id: Uuid) -> StoreResult<Message> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE message_id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => message_from_row(&row),
            None => Err(StoreError::NotFound(message_id)),
        }
    }

    async fn find_by_provider_message_id(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> StoreResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE provider = $1 AND provider_message_id = $2 LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(provider)
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn compare_and_swap(&self, mut message: Message) -> StoreResult<Message> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $3, attempts = $4, provider = $5, provider_message_id = $6,
                last_error = $7, next_attempt_at = $8, lease_expires_at = $9,
                updated_at = $10, version = version + 1
            WHERE message_id = $1 AND version = $2
            "#,
        )
        .bind(message.message_id)
        .bind(message.version)
        .bind(message.status.as_str())
        .bind(message.attempts as i32)
        .bind(&message.provider)
        .bind(&message.provider_message_id)
        .bind(&message.last_error)
        .bind(message.next_attempt_at)
        .bind(message.lease_expires_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either gone or moved on
            self.get(message.message_id).await?;
            return Err(StoreError::Conflict(message.message_id));
        }

        message.version += 1;
        Ok(message)
    }

    async fn ingest_event(&self, event: InboundEvent) -> StoreResult<IngestOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(mut message) = Self::lock_message(&mut tx, &event.provider, &event.message).await?
        else {
            tx.rollback().await?;
            return Ok(IngestOutcome::UnknownMessage);
        };
        let message_id = message.message_id;

        let seen: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM provider_events
            WHERE message_id = $1 AND provider = $2 AND provider_event_id = $3
            "#,
        )
        .bind(message_id)
        .bind(&event.provider)
        .bind(&event.provider_event_id)
        .fetch_optional(&mut *tx)
        .await?;

        if seen.is_some() {
            tx.rollback().await?;
            return Ok(IngestOutcome::Duplicate { message_id });
        }

        let (transition, record) = decide_ingest(&mut message, event);

        if transition.is_some() {
            sqlx::query(
                r#"
                UPDATE messages
                SET status = $2, updated_at = $3, version = version + 1
                WHERE message_id = $1
                "#,
            )
            .bind(message_id)
            .bind(message.status.as_str())
            .bind(message.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO provider_events
                (id, message_id, provider, provider_event_id, event_type, raw_payload,
                 occurred_at, applied, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.message_id)
        .bind(&record.provider)
        .bind(&record.provider_event_id)
        .bind(record.event_type.as_str())
        .bind(&record.raw_payload)
        .bind(record.occurred_at)
        .bind(record.applied)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        match transition {
            Some(transition) => {
                record_transition(&transition);
                Ok(IngestOutcome::Applied {
                    message_id,
                    transition,
                })
            }
            None => Ok(IngestOutcome::Recorded { message_id }),
        }
    }

    async fn events(&self, message_id: Uuid) -> StoreResult<Vec<ProviderEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, provider, provider_event_id, event_type, raw_payload,
                   occurred_at, applied, created_at
            FROM provider_events
            WHERE message_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn stuck_messages(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT message_id FROM messages WHERE {} ORDER BY next_attempt_at LIMIT $3",
            STUCK_FILTER
        ))
        .bind(stale_before)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn count_stuck(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM messages WHERE {}",
            STUCK_FILTER
        ))
        .bind(stale_before)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn status_counts(&self) -> StoreResult<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM messages GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status.parse()?, count.max(0) as u64);
        }
        Ok(counts)
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<PurgeStats> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT message_id FROM messages
            WHERE status IN ('DELIVERED', 'BOUNCED', 'FAILED') AND updated_at < $1
            ORDER BY updated_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(PurgeStats::default());
        }

        let ids: Vec<Uuid> = ids.into_iter().map(|(id,)| id).collect();

        let events = sqlx::query("DELETE FROM provider_events WHERE message_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let messages = sqlx::query("DELETE FROM messages WHERE message_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(PurgeStats { messages, events })
    }
    async fn park_event(&self, event: &InboundEvent) -> StoreResult<bool> {
        let MessageRef::ProviderMessageId(pid) = &event.message else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            INSERT INTO parked_events
                (provider, provider_message_id, provider_event_id, event_type, occurred_at,
                 raw_payload, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (provider, provider_message_id, provider_event_id) DO NOTHING
            "#,
        )
        .bind(&event.provider)
        .bind(pid)
        .bind(&event.provider_event_id)
        .bind(event.event_type.as_str())
        .bind(event.occurred_at)
        .bind(&event.raw_payload)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn take_parked(
        &self,
        provider: &str,
        provider_message_id: &str,
    ) -> StoreResult<Vec<InboundEvent>> {
        let rows = sqlx::query(
            r#"
            DELETE FROM parked_events
            WHERE provider = $1 AND provider_message_id = $2
            RETURNING provider, provider_message_id, provider_event_id, event_type,
                      occurred_at, raw_payload, received_at
            "#,
        )
        .bind(provider)
        .bind(provider_message_id)
        .fetch_all(&self.pool)
        .await?;

        let mut parked = rows
            .iter()
            .map(|row| {
                let received_at: DateTime<Utc> = row.try_get("received_at")?;
                Ok((received_at, parked_from_row(row)?))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        parked.sort_by_key(|(received_at, _)| *received_at);

        Ok(parked.into_iter().map(|(_, event)| event).collect())
    }

    async fn purge_parked_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM parked_events
            WHERE (provider, provider_message_id, provider_event_id) IN (
                SELECT provider, provider_message_id, provider_event_id
                FROM parked_events
                WHERE received_at < $1
                ORDER BY received_at
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
