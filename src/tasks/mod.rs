//! Background maintenance tasks.

mod reclaim;
mod retention;

pub use reclaim::ReclaimTask;
pub use retention::{RetentionReport, RetentionTask};
