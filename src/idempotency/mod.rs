//! Idempotency keys for send requests.
//!
//! A `(callerId, Idempotency-Key)` pair is reserved before any message is
//! created. Replays within the TTL answer with the original message id;
//! expired reservations behave as if absent.

mod backend;
mod factory;
mod guard;
mod memory_backend;
mod postgres_backend;
mod redis_backend;

pub use backend::{
    IdempotencyBackend, IdempotencyError, IdempotencyRecord, IdempotencyResult, Reservation,
};
pub use factory::create_idempotency_backend;
pub use guard::{fingerprint, Admission, IdempotencyGuard};
pub use memory_backend::MemoryIdempotencyBackend;
pub use postgres_backend::PostgresIdempotencyBackend;
pub use redis_backend::RedisIdempotencyBackend;
