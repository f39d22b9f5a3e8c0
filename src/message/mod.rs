//! Messages, provider events and the delivery state machine.
//!
//! Every status write goes through either [`mutate_message`] (worker
//! attempts, claims) or [`MessageStore::ingest_event`] (webhooks); both
//! are guarded against lost updates by the message `version`.

mod factory;
mod memory_store;
mod postgres_store;
pub mod state_machine;
mod store;
mod types;

pub use factory::create_message_store;
pub use memory_store::MemoryMessageStore;
pub use postgres_store::PostgresMessageStore;
pub use state_machine::{AttemptEffect, AttemptOutcome, Transition};
pub use store::{adopt_parked, mutate_message, IngestOutcome, MessageStore};
pub use types::{
    EventType, InboundEvent, Message, MessageRef, MessageStatus, MessageView, ProviderEvent,
    PurgeStats, StatusCounts, StoreError, StoreResult,
};
