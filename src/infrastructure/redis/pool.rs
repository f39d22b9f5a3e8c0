//! Redis connection for the Redis idempotency backend.
//!
//! Wraps a `ConnectionManager`, which multiplexes commands over one
//! connection and reconnects on its own after failures.

use redis::aio::ConnectionManager;
use redis::{Client, RedisError};

use crate::config::RedisConfig;
use crate::postgres::mask_url;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum RedisPoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Redis URL not configured")]
    MissingUrl,
}

#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
    url: String,
}

impl RedisPool {
    /// Connect to the configured Redis server.
    pub async fn connect(config: &RedisConfig) -> Result<Self, RedisPoolError> {
        let url = config.url.as_deref().ok_or(RedisPoolError::MissingUrl)?;
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        tracing::info!(url = %mask_url(url), "Redis connection established");

        Ok(Self {
            manager,
            url: url.to_string(),
        })
    }

    /// A cheap handle to the managed connection
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.connection();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    pub fn url_masked(&self) -> String {
        mask_url(&self.url)
    }
}
