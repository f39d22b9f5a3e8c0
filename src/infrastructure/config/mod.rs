mod settings;

pub use settings::{
    ApiConfig, DatabaseConfig, DispatchConfig, IdempotencyConfig, OtelConfig, ProviderConfig,
    RedisConfig, RetentionConfig, ServerConfig, Settings, StorageConfig,
};
