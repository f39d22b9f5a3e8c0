//! Idempotency backend factory

use std::sync::Arc;

use crate::config::IdempotencyConfig;
use crate::postgres::PostgresPool;
use crate::redis::RedisPool;

use super::backend::IdempotencyBackend;
use super::memory_backend::MemoryIdempotencyBackend;
use super::postgres_backend::PostgresIdempotencyBackend;
use super::redis_backend::RedisIdempotencyBackend;

/// Create an idempotency backend based on configuration.
///
/// - `"postgres"`: `PostgresIdempotencyBackend` if a PostgreSQL pool is provided
/// - `"redis"`: `RedisIdempotencyBackend` if a Redis pool is provided
/// - `"memory"` (default): `MemoryIdempotencyBackend`
///
/// A backend whose pool is missing falls back to memory with a warning.
pub fn create_idempotency_backend(
    settings: &IdempotencyConfig,
    redis_pool: Option<RedisPool>,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn IdempotencyBackend> {
    match settings.backend.as_str() {
        "postgres" => {
            if let Some(pool) = postgres_pool {
                tracing::info!(backend = "postgres", "Creating PostgreSQL idempotency backend");
                Arc::new(PostgresIdempotencyBackend::new(pool.pool().clone()))
            } else {
                tracing::warn!(
                    "PostgreSQL idempotency backend requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryIdempotencyBackend::new())
            }
        }
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis_prefix,
                    "Creating Redis idempotency backend"
                );
                Arc::new(RedisIdempotencyBackend::new(pool, settings.redis_prefix.clone()))
            } else {
                tracing::warn!(
                    "Redis idempotency backend requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryIdempotencyBackend::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory idempotency backend");
            Arc::new(MemoryIdempotencyBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_pools_fall_back_to_memory() {
        for backend in ["postgres", "redis", "memory", "unknown"] {
            let settings = IdempotencyConfig {
                backend: backend.to_string(),
                ..Default::default()
            };
            let created = create_idempotency_backend(&settings, None, None);
            assert_eq!(created.backend_name(), "memory");
        }
    }
}
