//! Logging and trace export for the gateway.
//!
//! Every process logs through `tracing`. With `MAILGATE_OTEL__ENABLED=true`
//! the same spans are exported over OTLP, so one trace covers the accept
//! request (`email.accept`), each worker attempt (`dispatch.attempt`) and
//! the provider callbacks that settle the message (`webhook.ingest`).
//! Spans and events on those paths carry `message_id`.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `RUST_LOG` | Filter directives | [`DEFAULT_FILTER`] |
//! | `LOG_FORMAT` | `json` for one object per line | human readable |
//! | `MAILGATE_OTEL__ENABLED` | Export spans | `false` |
//! | `MAILGATE_OTEL__ENDPOINT` | OTLP gRPC collector | `http://localhost:4317` |
//! | `MAILGATE_OTEL__SERVICE_NAME` | `service.name` resource | `ara-email-gateway` |
//! | `MAILGATE_OTEL__SAMPLING_RATIO` | Fraction of traces kept | `1.0` |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{
    SERVICE_NAME, SERVICE_NAMESPACE, SERVICE_VERSION,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::OtelConfig;

/// Filter used when `RUST_LOG` is unset: gateway events at info, chatty
/// driver and transport crates at warn.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn,h2=warn,tower=warn,reqwest=warn";

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP span exporter: {0}")]
    Exporter(String),
    #[error("Invalid log filter: {0}")]
    Filter(String),
}

/// How console lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value; anything but `json` is text.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }

    fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Keeps the span exporter alive; dropping it flushes pending spans.
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to flush spans on shutdown");
            }
        }
    }
}

/// Install the global subscriber. Keep the guard until shutdown.
pub fn init_telemetry(config: &OtelConfig) -> TelemetryResult<TelemetryGuard> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives),
        _ => EnvFilter::try_new(DEFAULT_FILTER),
    }
    .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    let format = LogFormat::from_env();
    let console = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };

    let provider = if config.enabled {
        Some(span_exporter(config)?)
    } else {
        None
    };
    let export = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(export)
        .init();

    tracing::info!(
        format = ?format,
        otel = config.enabled,
        endpoint = %config.endpoint,
        sampling_ratio = config.sampling_ratio,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard { provider })
}

/// Sampler for a configured ratio; out-of-range and NaN ratios clamp.
pub fn sampler(ratio: f64) -> Sampler {
    if ratio.is_nan() || ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(ratio)))
    }
}

/// Resource attributes attached to every exported span
pub fn resource(config: &OtelConfig) -> Resource {
    Resource::new(vec![
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_NAMESPACE, "mail"),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ])
}

fn span_exporter(config: &OtelConfig) -> TelemetryResult<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler(config.sampling_ratio))
        .with_resource(resource(config))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OtelConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.service_name, "ara-email-gateway");
        assert_eq!(config.sampling_ratio, 1.0);
    }

    #[test]
    fn test_log_format() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Text);
        assert_eq!(LogFormat::parse(None), LogFormat::Text);
    }

    #[test]
    fn test_sampler_clamps_ratio() {
        assert!(matches!(sampler(1.5), Sampler::AlwaysOn));
        assert!(matches!(sampler(f64::NAN), Sampler::AlwaysOn));
        assert!(matches!(sampler(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler(-1.0), Sampler::AlwaysOff));
        assert!(matches!(sampler(0.25), Sampler::ParentBased(_)));
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_resource_names_the_gateway() {
        let resource = resource(&OtelConfig::default());
        assert_eq!(
            resource.get(opentelemetry::Key::new(SERVICE_NAME)),
            Some(opentelemetry::Value::from("ara-email-gateway"))
        );
        assert_eq!(
            resource.get(opentelemetry::Key::new(SERVICE_NAMESPACE)),
            Some(opentelemetry::Value::from("mail"))
        );
    }

    #[test]
    fn test_disabled_guard_does_not_export() {
        let guard = TelemetryGuard { provider: None };
        assert!(!guard.exporting());
    }
}
