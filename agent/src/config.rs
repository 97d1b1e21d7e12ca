//! Configuration management for the agent.

use feedsync_engine::{clock::SECOND, CachePolicy, RetryPolicy};
use std::{env, time::Duration};

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL of the local store
    pub database_url: String,
    /// Base URL of the remote API
    pub api_url: String,
    /// Bearer token for the remote API
    pub api_token: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// How often reachability of the API is probed
    pub probe_interval: Duration,
    pub sync: SyncConfig,
}

/// Sync engine tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the auto-sync timer
    pub interval: Duration,
    /// Start the timer on initialize
    pub auto_sync: bool,
    pub retry: RetryPolicy,
    pub cache: CachePolicy,
    /// Randomize backoff delays between 50% and 100%
    pub jitter: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            auto_sync: true,
            retry: RetryPolicy::default(),
            cache: CachePolicy::default(),
            jitter: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url =
            var("FEEDSYNC_DATABASE_URL").unwrap_or_else(|| "sqlite://feedsync.db".to_string());
        if !database_url.starts_with("sqlite:") {
            return Err(ConfigError::InvalidDatabaseUrl(database_url));
        }

        let api_url = var("FEEDSYNC_API_URL")
            .unwrap_or_else(|| "https://jsonplaceholder.typicode.com".to_string());
        let api_token = var("FEEDSYNC_API_TOKEN");

        let request_timeout = seconds(&var, "FEEDSYNC_REQUEST_TIMEOUT_SECS", 10)?;
        let probe_interval = seconds(&var, "FEEDSYNC_PROBE_INTERVAL_SECS", 30)?;
        let interval = seconds(&var, "FEEDSYNC_SYNC_INTERVAL_SECS", 300)?;
        for (name, value) in [
            ("FEEDSYNC_REQUEST_TIMEOUT_SECS", request_timeout),
            ("FEEDSYNC_PROBE_INTERVAL_SECS", probe_interval),
            ("FEEDSYNC_SYNC_INTERVAL_SECS", interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive(name));
            }
        }

        let auto_sync = boolean(&var, "FEEDSYNC_AUTO_SYNC", true)?;

        let max_attempts: u32 = number(&var, "FEEDSYNC_MAX_SYNC_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::MustBePositive("FEEDSYNC_MAX_SYNC_ATTEMPTS"));
        }
        let backoff_secs: u64 = number(&var, "FEEDSYNC_RETRY_BACKOFF_SECS", 0)?;
        let retry = RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_backoff(backoff_secs.saturating_mul(SECOND));

        let mut cache = CachePolicy::default();
        let post_max_age: u64 = number(&var, "FEEDSYNC_POST_MAX_AGE_SECS", 86_400)?;
        cache.posts.max_age = post_max_age.saturating_mul(SECOND);
        cache.posts.stale_after = cache.posts.stale_after.min(cache.posts.max_age);

        Ok(Self {
            database_url,
            api_url,
            api_token,
            request_timeout,
            probe_interval,
            sync: SyncConfig {
                interval,
                auto_sync,
                retry,
                cache,
                ..SyncConfig::default()
            },
        })
    }
}

type Lookup<'a> = dyn Fn(&'static str) -> Option<String> + 'a;

fn number<T>(var: &Lookup, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

fn seconds(var: &Lookup, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    number(var, name, default).map(Duration::from_secs)
}

fn boolean(var: &Lookup, name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool { name, value }),
        },
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be true or false, got {value:?}")]
    InvalidBool { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("FEEDSYNC_DATABASE_URL must be a sqlite: URL, got {0:?}")]
    InvalidDatabaseUrl(String),
}
