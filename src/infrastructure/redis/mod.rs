//! Redis connectivity.

pub mod pool;

pub use pool::{RedisPool, RedisPoolError};
