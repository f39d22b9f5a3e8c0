//! PostgreSQL persistence module.
//!
//! Provides connection pooling and schema bootstrap for the PostgreSQL backends.

pub mod pool;

pub use pool::{mask_url, PostgresPool, PostgresPoolError};
