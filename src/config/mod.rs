//! Configuration module for the sync service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backup::BackupPolicy;
use crate::retry::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to the SQLite file backing the local cache store
    pub cache_path: PathBuf,
    /// Base URL of the remote record store
    pub remote_url: String,
    /// Directory holding the section templates (`anagrafici.html`, ...)
    pub template_dir: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Backoff settings for remote operations
    pub retry: RetryPolicy,
    /// Snapshot retention and timer settings
    pub backup: BackupPolicy,
    /// How often the HTTP record store polls for a changed document
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("ESPLO_API_PSK").ok();

        let cache_path = env::var("ESPLO_CACHE_PATH")
            .unwrap_or_else(|_| "./data/cache.sqlite".to_string())
            .into();

        let remote_url =
            env::var("ESPLO_REMOTE_URL").unwrap_or_else(|_| "http://127.0.0.1:9000".to_string());

        let template_dir = env::var("ESPLO_TEMPLATE_DIR")
            .unwrap_or_else(|_| "./sezioni".to_string())
            .into();

        let bind_addr = env::var("ESPLO_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid ESPLO_BIND_ADDR format");

        let log_level = env::var("ESPLO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or("ESPLO_RETRY_MAX_ATTEMPTS", defaults.max_attempts),
            initial_delay: Duration::from_millis(parse_or(
                "ESPLO_RETRY_INITIAL_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )),
            backoff_factor: parse_or("ESPLO_RETRY_BACKOFF_FACTOR", defaults.backoff_factor),
            max_delay: Duration::from_millis(parse_or(
                "ESPLO_RETRY_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )),
            max_jitter: defaults.max_jitter,
        };

        let backup_defaults = BackupPolicy::default();
        let backup = BackupPolicy {
            max_backups: parse_or("ESPLO_MAX_BACKUPS", backup_defaults.max_backups),
            interval: Duration::from_secs(parse_nonzero(
                "ESPLO_BACKUP_INTERVAL_SECS",
                backup_defaults.interval.as_secs(),
            )),
        };

        let poll_interval = Duration::from_millis(parse_nonzero("ESPLO_POLL_INTERVAL_MS", 2000));

        Self {
            api_psk,
            cache_path,
            remote_url,
            template_dir,
            bind_addr,
            log_level,
            retry,
            backup,
            poll_interval,
        }
    }
}

/// Parse a numeric variable, keeping the default when unset or malformed.
fn parse_or<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Like [`parse_or`] for timer periods, which must not be zero.
fn parse_nonzero(key: &str, default: u64) -> u64 {
    match parse_or(key, default) {
        0 => {
            tracing::warn!("{} must be greater than zero, using default {}", key, default);
            default
        }
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        for key in [
            "ESPLO_API_PSK",
            "ESPLO_CACHE_PATH",
            "ESPLO_REMOTE_URL",
            "ESPLO_TEMPLATE_DIR",
            "ESPLO_BIND_ADDR",
            "ESPLO_LOG_LEVEL",
            "ESPLO_RETRY_MAX_ATTEMPTS",
            "ESPLO_RETRY_INITIAL_DELAY_MS",
            "ESPLO_RETRY_BACKOFF_FACTOR",
            "ESPLO_RETRY_MAX_DELAY_MS",
            "ESPLO_MAX_BACKUPS",
            "ESPLO_BACKUP_INTERVAL_SECS",
            "ESPLO_POLL_INTERVAL_MS",
        ] {
            env::remove_var(key);
        }

        let config = Config::from_env();

        assert!(config.api_psk.is_none());
        assert_eq!(config.cache_path, PathBuf::from("./data/cache.sqlite"));
        assert_eq!(config.remote_url, "http://127.0.0.1:9000");
        assert_eq!(config.template_dir, PathBuf::from("./sezioni"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1000));
        assert_eq!(config.retry.max_delay, Duration::from_millis(10_000));
        assert_eq!(config.backup.max_backups, 5);
        assert_eq!(config.backup.interval, Duration::from_secs(30 * 60));
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_parse_or_keeps_default_on_garbage() {
        env::set_var("ESPLO_TEST_PARSE_OR", "not-a-number");
        assert_eq!(parse_or("ESPLO_TEST_PARSE_OR", 7u32), 7);
        env::set_var("ESPLO_TEST_PARSE_OR", "11");
        assert_eq!(parse_or("ESPLO_TEST_PARSE_OR", 7u32), 11);
        env::remove_var("ESPLO_TEST_PARSE_OR");
    }

    #[test]
    fn test_zero_timer_periods_fall_back_to_defaults() {
        env::set_var("ESPLO_TEST_ZERO_PERIOD", "0");
        assert_eq!(parse_nonzero("ESPLO_TEST_ZERO_PERIOD", 2000), 2000);
        env::set_var("ESPLO_TEST_ZERO_PERIOD", "250");
        assert_eq!(parse_nonzero("ESPLO_TEST_ZERO_PERIOD", 2000), 250);
        env::remove_var("ESPLO_TEST_ZERO_PERIOD");
    }
}
