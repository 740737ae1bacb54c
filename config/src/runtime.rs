//! Typed runtime settings read from the process environment.
//!
//! Call [`crate::load_and_apply`] first so `.env` / `config.toml` values are
//! visible, then `RuntimeSettings::from_env()`. Every knob has a default; a
//! present-but-unparsable value is an error rather than a silent fallback.

use std::time::Duration;

use crate::LoadError;

/// Runtime knobs for composing the weft runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    /// SQLite database path (`WEFT_DB`, default `weft.db`).
    pub database_path: String,
    /// Backend sync cycle interval (`WEFT_SYNC_INTERVAL_SECS`, default 10s).
    pub sync_interval: Duration,
    /// Download cycle interval (`WEFT_DOWNLOAD_INTERVAL_SECS`, default 2s).
    pub download_interval: Duration,
    /// Dispatcher cache refresh interval (`WEFT_EVENT_REFRESH_SECS`, default 30s).
    pub event_refresh_interval: Duration,
    /// Circuit breaker failure threshold (`WEFT_BREAKER_FAILURES`, default 3).
    pub breaker_failure_threshold: u32,
    /// Circuit breaker reset timeout (`WEFT_BREAKER_RESET_SECS`, default 10s).
    pub breaker_reset_timeout: Duration,
    /// Sandbox bridge call timeout (`WEFT_SANDBOX_TIMEOUT_SECS`, default 30s).
    pub sandbox_timeout: Duration,
    /// Hosts the sandbox `fetch` capability may reach
    /// (`WEFT_FETCH_ALLOW`, comma-separated; default empty = deny all).
    pub fetch_allow_hosts: Vec<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            database_path: "weft.db".to_string(),
            sync_interval: Duration::from_secs(10),
            download_interval: Duration::from_secs(2),
            event_refresh_interval: Duration::from_secs(30),
            breaker_failure_threshold: 3,
            breaker_reset_timeout: Duration::from_secs(10),
            sandbox_timeout: Duration::from_secs(30),
            fetch_allow_hosts: Vec::new(),
        }
    }
}

fn parse_secs(key: &str, default: Duration) -> Result<Duration, LoadError> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| LoadError::InvalidSetting {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

fn parse_u32(key: &str, default: u32) -> Result<u32, LoadError> {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<u32>().map_err(|e| LoadError::InvalidSetting {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl RuntimeSettings {
    /// Reads settings from the environment, applying defaults for missing keys.
    pub fn from_env() -> Result<Self, LoadError> {
        let defaults = Self::default();
        Ok(Self {
            database_path: std::env::var("WEFT_DB").unwrap_or(defaults.database_path),
            sync_interval: parse_secs("WEFT_SYNC_INTERVAL_SECS", defaults.sync_interval)?,
            download_interval: parse_secs(
                "WEFT_DOWNLOAD_INTERVAL_SECS",
                defaults.download_interval,
            )?,
            event_refresh_interval: parse_secs(
                "WEFT_EVENT_REFRESH_SECS",
                defaults.event_refresh_interval,
            )?,
            breaker_failure_threshold: parse_u32(
                "WEFT_BREAKER_FAILURES",
                defaults.breaker_failure_threshold,
            )?,
            breaker_reset_timeout: parse_secs(
                "WEFT_BREAKER_RESET_SECS",
                defaults.breaker_reset_timeout,
            )?,
            sandbox_timeout: parse_secs("WEFT_SANDBOX_TIMEOUT_SECS", defaults.sandbox_timeout)?,
            fetch_allow_hosts: std::env::var("WEFT_FETCH_ALLOW")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.fetch_allow_hosts),
        })
    }
}
