//! Redis idempotency backend.
//!
//! Each reservation is one JSON string at `{prefix}:{caller_id}:{key}`,
//! written with `SET NX EX` so Redis both arbitrates races and expires it.

use async_trait::async_trait;
use chrono::Utc;
use redis::Script;
use uuid::Uuid;

use crate::redis::RedisPool;

use super::backend::{
    IdempotencyBackend, IdempotencyError, IdempotencyRecord, IdempotencyResult, Reservation,
};

const MAX_RESERVE_ROUNDS: usize = 3;

/// Delete the key only while it still names the given message
const RELEASE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and cjson.decode(current)['messageId'] == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisIdempotencyBackend {
    pool: RedisPool,
    prefix: String,
}

impl RedisIdempotencyBackend {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn redis_key(&self, caller_id: &str, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, caller_id, key)
    }
}

#[async_trait]
impl IdempotencyBackend for RedisIdempotencyBackend {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn reserve(&self, record: IdempotencyRecord) -> IdempotencyResult<Reservation> {
        let redis_key = self.redis_key(&record.caller_id, &record.key);
        let ttl = (record.expires_at - Utc::now()).num_seconds().max(1);
        let value = serde_json::to_string(&record)?;
        let mut conn = self.pool.connection();

        for _ in 0..MAX_RESERVE_ROUNDS {
            let set: Option<String> = redis::cmd("SET")
                .arg(&redis_key)
                .arg(&value)
                .arg("NX")
                .arg("EX")
                .arg(ttl)
                .query_async(&mut conn)
                .await?;

            if set.is_some() {
                return Ok(Reservation::Reserved);
            }

            let existing: Option<String> = redis::cmd("GET")
                .arg(&redis_key)
                .query_async(&mut conn)
                .await?;

            // Expired between SET and GET: try again
            if let Some(existing) = existing {
                return Ok(Reservation::Existing(serde_json::from_str(&existing)?));
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
        let mut conn = self.pool.connection();
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(self.redis_key(caller_id, key))
            .arg(message_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, _limit: usize) -> IdempotencyResult<u64> {
        // Keys carry their own TTL
        Ok(0)
    }
}
