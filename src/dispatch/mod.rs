//! Dispatch queue, workers and outbound provider transports.

mod backoff;
pub mod providers;
mod queue;
mod transport;
mod worker;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use providers::create_transport;
pub use queue::DispatchQueue;
pub use transport::{EmailTransport, OutboundEmail, SentEmail, TransportError};
pub use worker::{DispatchOutcome, DispatchPolicy, Dispatcher, WorkerPool};
