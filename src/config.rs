use crate::idempotency::CoordinatorConfig;
use crate::observability::{LogConfig, LogFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

impl ApplicationSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level.clone(),
            format: LogFormat::from(self.format.as_str()),
            ..LogConfig::default()
        }
    }
}

/// Tunables for key lifetime, pending-record waits, sweeping and caching.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    pub ttl_seconds: i64,
    pub pending_poll_interval_ms: u64,
    pub pending_wait_ms: u64,
    pub operation_timeout_ms: Option<u64>,
    pub sweep_interval_seconds: u64,
    pub cache_enabled: bool,
    pub cache_key_prefix: String,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        Self {
            ttl_seconds: coordinator.ttl_seconds,
            pending_poll_interval_ms: coordinator.pending_poll_interval_ms,
            pending_wait_ms: coordinator.pending_wait_ms,
            operation_timeout_ms: coordinator.operation_timeout_ms,
            sweep_interval_seconds: 300,
            cache_enabled: true,
            cache_key_prefix: "idem".to_string(),
        }
    }
}

impl IdempotencySettings {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            ttl_seconds: self.ttl_seconds,
            pending_poll_interval_ms: self.pending_poll_interval_ms,
            pending_wait_ms: self.pending_wait_ms,
            operation_timeout_ms: self.operation_timeout_ms,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
