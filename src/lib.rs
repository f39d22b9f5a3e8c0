// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::postgres;
pub use infrastructure::redis;

// Domain layer (business logic)
pub mod dispatch;
pub mod email;
pub mod idempotency;
pub mod message;
pub mod template;
pub mod webhook;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod tasks;
pub mod telemetry;
