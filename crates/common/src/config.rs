//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Which remote store backs the synchronized views.
    #[serde(default)]
    pub store: StoreConfig,
    /// Database configuration (required for the `postgres` backend).
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Redis configuration for cross-process insert notifications.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Synchronization tuning.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Log output configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote store selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Store backend.
    #[serde(default)]
    pub backend: StoreBackend,
}

/// Available store backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, nothing persisted.
    #[default]
    Memory,
    /// `PostgreSQL` through sea-orm.
    Postgres,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis channels.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Synchronization tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for any single fetch or remote write.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Page size for post feeds.
    #[serde(default = "default_feed_page_size")]
    pub feed_page_size: u64,
    /// Page size for comment threads.
    #[serde(default = "default_thread_page_size")]
    pub thread_page_size: u64,
    /// Page size for the leaderboard.
    #[serde(default = "default_leaderboard_page_size")]
    pub leaderboard_page_size: u64,
    /// Page size for challenge boards, team lists and goal lists.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: u64,
    /// Polling interval for poll-driven widgets.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Buffered notices kept for slow presentation consumers.
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

fn default_redis_prefix() -> String {
    "ecolearn".to_string()
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

const fn default_feed_page_size() -> u64 {
    20
}

const fn default_thread_page_size() -> u64 {
    50
}

const fn default_leaderboard_page_size() -> u64 {
    100
}

const fn default_list_page_size() -> u64 {
    100
}

const fn default_poll_interval_ms() -> u64 {
    600_000
}

const fn default_notice_capacity() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            feed_page_size: default_feed_page_size(),
            thread_page_size: default_thread_page_size(),
            leaderboard_page_size: default_leaderboard_page_size(),
            list_page_size: default_list_page_size(),
            poll_interval_ms: default_poll_interval_ms(),
            notice_capacity: default_notice_capacity(),
        }
    }
}

impl SyncConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `ECOLEARN_ENV`)
    /// 3. Environment variables with `ECOLEARN_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("ECOLEARN_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("ECOLEARN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ECOLEARN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = from_toml("");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.database.is_none());
        assert!(config.redis.is_none());
        assert_eq!(config.sync.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.poll_interval(), Duration::from_secs(600));
        assert_eq!(config.sync.feed_page_size, 20);
        assert_eq!(config.sync.thread_page_size, 50);
        assert_eq!(config.sync.leaderboard_page_size, 100);
        assert_eq!(config.sync.list_page_size, 100);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_postgres_backend() {
        let config = from_toml(
            r#"
            [store]
            backend = "postgres"

            [database]
            url = "postgres://localhost/ecolearn"

            [redis]
            url = "redis://localhost:6379"

            [sync]
            request_timeout_ms = 2500

            [logging]
            format = "json"
            "#,
        );
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 20);
        assert_eq!(database.min_connections, 2);
        assert_eq!(config.redis.unwrap().prefix, "ecolearn");
        assert_eq!(config.sync.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.sync.feed_page_size, 20);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
