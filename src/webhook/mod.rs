//! Provider webhook normalization and ingestion.

mod ingest;
mod normalize;

pub use ingest::{DeliveryIngestor, IngestSummary};
pub use normalize::{
    normalize, split_batch, validate_provider, Normalized, WebhookError, WebhookResult,
};
