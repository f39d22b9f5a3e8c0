//! Template repository factory

use std::sync::Arc;

use crate::postgres::PostgresPool;

use super::postgres_store::PostgresTemplateStore;
use super::store::{MemoryTemplateStore, TemplateRepository};

/// Create a template repository for the configured storage backend.
///
/// - `"postgres"`: a `PostgresTemplateStore` when a pool is available
/// - anything else: a `MemoryTemplateStore`
pub fn create_template_repository(
    backend: &str,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn TemplateRepository> {
    match (backend, postgres_pool) {
        ("postgres", Some(pool)) => {
            tracing::info!(backend = "postgres", "Creating PostgreSQL template store");
            Arc::new(PostgresTemplateStore::new(pool.pool().clone()))
        }
        ("postgres", None) => {
            tracing::warn!(
                "PostgreSQL template store requested but no pool provided, falling back to memory"
            );
            Arc::new(MemoryTemplateStore::new())
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory template store");
            Arc::new(MemoryTemplateStore::new())
        }
    }
}
