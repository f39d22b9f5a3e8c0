//! Message store factory

use std::sync::Arc;

use crate::postgres::PostgresPool;

use super::memory_store::MemoryMessageStore;
use super::postgres_store::PostgresMessageStore;
use super::store::MessageStore;

/// Create a message store for the configured storage backend.
pub fn create_message_store(
    backend: &str,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn MessageStore> {
    match (backend, postgres_pool) {
        ("postgres", Some(pool)) => {
            tracing::info!(backend = "postgres", "Creating PostgreSQL message store");
            Arc::new(PostgresMessageStore::new(pool.pool().clone()))
        }
        ("postgres", None) => {
            tracing::warn!(
                "PostgreSQL message store requested but no pool provided, falling back to memory"
            );
            Arc::new(MemoryMessageStore::new())
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory message store");
            Arc::new(MemoryMessageStore::new())
        }
    }
}
