//! Configuration module for feedloop.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{FeedLoopError, Result};

/// Scheduler and worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-feed lock TTL in seconds.
    ///
    /// Must cover the full per-cycle retry budget so a lock never expires
    /// under a live worker; the worker raises it to that budget when
    /// configured lower. Bounded so a crashed worker does not block a feed
    /// indefinitely.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
    /// Minimum spacing between requests to the same hostname, in milliseconds.
    #[serde(default = "default_domain_interval")]
    pub domain_min_interval_ms: u64,
    /// Maximum time to wait on the domain rate limiter, in seconds.
    #[serde(default = "default_domain_max_wait")]
    pub domain_max_wait_secs: u64,
    /// Maximum fetch attempts per refresh cycle.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry backoff in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Multiplier applied to the backoff on each retry.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound on a single backoff delay, in milliseconds.
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
    /// Number of feeds scheduled per batch during startup bootstrap.
    #[serde(default = "default_startup_batch_size")]
    pub startup_batch_size: usize,
    /// Maximum random jitter between startup batches, in milliseconds.
    #[serde(default = "default_startup_batch_jitter")]
    pub startup_batch_jitter_ms: u64,
}

fn default_workers() -> usize {
    5
}

fn default_lock_ttl() -> u64 {
    300 // 3 attempts x (hard timeout + rate limit wait) plus backoffs
}

fn default_domain_interval() -> u64 {
    1000
}

fn default_domain_max_wait() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_cap() -> u64 {
    60_000
}

fn default_startup_batch_size() -> usize {
    10
}

fn default_startup_batch_jitter() -> u64 {
    500
}

impl SchedulerConfig {
    /// Lock TTL as a [`Duration`].
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Minimum per-domain request spacing as a [`Duration`].
    pub fn domain_min_interval(&self) -> Duration {
        Duration::from_millis(self.domain_min_interval_ms)
    }

    /// Maximum rate limiter wait as a [`Duration`].
    pub fn domain_max_wait(&self) -> Duration {
        Duration::from_secs(self.domain_max_wait_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            lock_ttl_secs: default_lock_ttl(),
            domain_min_interval_ms: default_domain_interval(),
            domain_max_wait_secs: default_domain_max_wait(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_factor: default_backoff_factor(),
            backoff_cap_ms: default_backoff_cap(),
            startup_batch_size: default_startup_batch_size(),
            startup_batch_jitter_ms: default_startup_batch_jitter(),
        }
    }
}

/// Feed fetching configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds (soft timeout).
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Hard timeout in seconds after which an attempt is force-killed.
    ///
    /// Must be shorter than the lock TTL.
    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_secs: u64,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum articles stored per fetch.
    #[serde(default = "default_max_articles")]
    pub max_articles_per_fetch: usize,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_hard_timeout() -> u64 {
    60
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_articles() -> usize {
    100
}

impl FetchConfig {
    /// Hard per-attempt timeout as a [`Duration`].
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            hard_timeout_secs: default_hard_timeout(),
            max_feed_size_bytes: default_max_feed_size(),
            max_redirects: default_max_redirects(),
            max_articles_per_fetch: default_max_articles(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedloop.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace / debug / info / warn / error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedloop.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedLoopError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedLoopError::Config(format!("config parse error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.workers, 5);
        assert_eq!(config.scheduler.domain_min_interval_ms, 1000);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.fetch.hard_timeout_secs, 60);
        assert_eq!(config.database.path, "data/feedloop.db");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_hard_timeout_below_lock_ttl() {
        let config = Config::default();
        assert!(config.fetch.hard_timeout() < config.scheduler.lock_ttl());
    }

    #[test]
    fn test_parse_empty_toml_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.scheduler.workers, 5);
        assert_eq!(config.scheduler.backoff_base_ms, 2000);
    }

    #[test]
    fn test_parse_partial_section() {
        let config = Config::parse(
            r#"
[scheduler]
workers = 2
domain_min_interval_ms = 250

[fetch]
hard_timeout_secs = 15
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.scheduler.domain_min_interval_ms, 250);
        // Untouched fields keep defaults
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.fetch.hard_timeout_secs, 15);
        assert_eq!(config.fetch.max_redirects, 5);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = Config::parse("not [valid toml");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config parse"));
    }

    #[test]
    fn test_duration_helpers() {
        let config = SchedulerConfig::default();
        assert_eq!(config.lock_ttl(), Duration::from_secs(300));
        assert_eq!(config.domain_min_interval(), Duration::from_millis(1000));
        assert_eq!(config.domain_max_wait(), Duration::from_secs(30));
    }
}
