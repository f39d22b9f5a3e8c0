//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `error`: HTTP error type and domain error mapping
//! - `metrics`: Prometheus metrics helpers
//! - `postgres`: PostgreSQL connection pool and schema
//! - `redis`: Redis connection pool

pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;
