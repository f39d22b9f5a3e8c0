//! Provider transports and the factory that picks one from config

mod http;
mod log;
mod mock;

use std::sync::Arc;
use std::time::Duration;

pub use http::{HttpTransport, HttpTransportConfig};
pub use log::LogTransport;
pub use mock::{MockReply, MockTransport};

use crate::config::ProviderConfig;

use super::transport::EmailTransport;

/// Create the configured transport. An `http` provider without an
/// endpoint falls back to logging.
pub fn create_transport(config: &ProviderConfig, timeout: Duration) -> Arc<dyn EmailTransport> {
    match (config.kind.as_str(), config.endpoint.as_deref()) {
        ("http", Some(endpoint)) => {
            let http = HttpTransport::new(HttpTransportConfig {
                name: config.name.clone(),
                endpoint: endpoint.to_string(),
                api_key: config.api_key.clone(),
                timeout,
            });
            match http {
                Ok(transport) => {
                    tracing::info!(provider = %config.name, endpoint = %endpoint, "Using HTTP email transport");
                    Arc::new(transport)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build HTTP transport, falling back to log");
                    Arc::new(LogTransport::new(config.name.clone()))
                }
            }
        }
        ("http", None) => {
            tracing::warn!("HTTP provider requested but no endpoint configured, falling back to log");
            Arc::new(LogTransport::new(config.name.clone()))
        }
        _ => {
            tracing::info!(provider = %config.name, "Using log email transport");
            Arc::new(LogTransport::new(config.name.clone()))
        }
    }
}
