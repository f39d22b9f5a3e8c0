use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Expected `X-API-Key` value. `None` admits every caller.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL; required when any backend is `postgres`
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    /// Redis URL; required when the idempotency backend is `redis`
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `memory` or `postgres`, applies to templates and messages
    #[serde(default = "default_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// `memory`, `redis` or `postgres`
    #[serde(default = "default_backend")]
    pub backend: String,
    /// How long a key keeps pointing at its message
    #[serde(default = "default_idempotency_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,
    /// How long a duplicate request waits for the in-flight original to persist
    #[serde(default = "default_in_flight_wait_ms")]
    pub in_flight_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Number of concurrent dispatch workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the in-process hand-off channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_transport_timeout_ms")]
    pub transport_timeout_ms: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// A QUEUED message untouched for this long is considered stuck
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_seconds: u64,
    #[serde(default = "default_reclaim_batch_size")]
    pub reclaim_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// `log` or `http`
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    /// Provider name recorded on messages and used for webhook routing
    #[serde(default = "default_provider_name")]
    pub name: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_from")]
    pub default_from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_retention_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retention_interval")]
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_idempotency_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_redis_prefix() -> String {
    "mailgate:idempotency".to_string()
}

fn default_in_flight_wait_ms() -> u64 {
    5_000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_transport_timeout_ms() -> u64 {
    10_000
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_stale_after() -> u64 {
    120
}

fn default_reclaim_interval() -> u64 {
    30
}

fn default_reclaim_batch_size() -> usize {
    100
}

fn default_provider_kind() -> String {
    "log".to_string()
}

fn default_provider_name() -> String {
    "log".to_string()
}

fn default_from() -> String {
    "no-reply@example.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_window_days() -> u32 {
    30
}

fn default_retention_batch_size() -> usize {
    500
}

fn default_retention_interval() -> u64 {
    3_600
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-email-gateway".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("storage.backend", default_backend())?
            .set_default("idempotency.backend", default_backend())?
            .set_default("provider.kind", default_provider_kind())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // MAILGATE_SERVER__PORT, MAILGATE_DISPATCH__MAX_ATTEMPTS, MAILGATE_DATABASE__URL, ...
            .add_source(
                Environment::with_prefix("MAILGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Whether any component is configured to use Postgres.
    pub fn needs_postgres(&self) -> bool {
        self.storage.backend == "postgres" || self.idempotency.backend == "postgres"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            ttl_seconds: default_idempotency_ttl(),
            redis_prefix: default_redis_prefix(),
            in_flight_wait_ms: default_in_flight_wait_ms(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            transport_timeout_ms: default_transport_timeout_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
            stale_after_seconds: default_stale_after(),
            reclaim_interval_seconds: default_reclaim_interval(),
            reclaim_batch_size: default_reclaim_batch_size(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            name: default_provider_name(),
            endpoint: None,
            api_key: None,
            default_from: default_from(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_days: default_window_days(),
            batch_size: default_retention_batch_size(),
            interval_seconds: default_retention_interval(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
