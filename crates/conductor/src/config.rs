//! Runtime configuration for the dispatch engine and trigger firer.

use std::str::FromStr;
use std::time::Duration;

use iris_core::retry::RetryPolicy;

use crate::gateway::IceServer;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Read `name`, falling back to `default` when unset.
pub fn env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

/// Read a required variable.
pub fn env_required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

/// Settings for [`DispatchEngine`](crate::engine::DispatchEngine).
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub retry: RetryPolicy,
    /// App download link offered in registration messages.
    pub download_link: Option<String>,
    /// ICE/TURN servers attached to call pushes.
    pub ice_servers: Vec<IceServer>,
}

impl DispatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default |
    /// |-----------------------------------|---------|
    /// | `DISPATCH_MAX_RETRIES`            | `3`     |
    /// | `DISPATCH_RETRY_BACKOFF_SECS`     | `60`    |
    /// | `DISPATCH_MAX_RETRY_BACKOFF_SECS` | `3600`  |
    /// | `APP_DOWNLOAD_LINK`               | unset   |
    /// | `ICE_SERVERS`                     | `[]`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let retry = RetryPolicy {
            max_retries: env_or("DISPATCH_MAX_RETRIES", 3)?,
            base_delay: Duration::from_secs(env_or("DISPATCH_RETRY_BACKOFF_SECS", 60)?),
            max_delay: Duration::from_secs(env_or("DISPATCH_MAX_RETRY_BACKOFF_SECS", 3600)?),
        };

        let download_link = std::env::var("APP_DOWNLOAD_LINK")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let ice_servers = match std::env::var("ICE_SERVERS") {
            Ok(raw) if !raw.trim().is_empty() => parse_ice_servers(&raw)?,
            _ => Vec::new(),
        };

        Ok(Self {
            retry,
            download_link,
            ice_servers,
        })
    }
}

fn parse_ice_servers(raw: &str) -> Result<Vec<IceServer>, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
        name: "ICE_SERVERS",
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// FirerConfig
// ---------------------------------------------------------------------------

/// Settings for [`TriggerFirer`](crate::firer::TriggerFirer).
#[derive(Debug, Clone)]
pub struct FirerConfig {
    pub poll_interval: Duration,
    /// Maximum triggers fetched per cycle.
    pub batch_size: usize,
    /// Maximum dispatches fired at once within a cycle.
    pub concurrency: usize,
}

impl Default for FirerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 100,
            concurrency: 8,
        }
    }
}

impl FirerConfig {
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `TRIGGER_POLL_INTERVAL_SECS` | `10`    |
    /// | `TRIGGER_BATCH_SIZE`         | `100`   |
    /// | `TRIGGER_CONCURRENCY`        | `8`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: Duration::from_secs(env_or(
                "TRIGGER_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            batch_size: env_or("TRIGGER_BATCH_SIZE", defaults.batch_size)?.max(1),
            concurrency: env_or("TRIGGER_CONCURRENCY", defaults.concurrency)?.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_reject_bad_json() {
        let err = parse_ice_servers("not json").unwrap_err();
        assert!(err.to_string().starts_with("ICE_SERVERS has an invalid value"));
    }

    #[test]
    fn unset_variable_uses_default() {
        let value: u64 = env_or("IRIS_TEST_SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn missing_required_variable() {
        let err = env_required("IRIS_TEST_SURELY_UNSET_VARIABLE").unwrap_err();
        assert_eq!(err.to_string(), "IRIS_TEST_SURELY_UNSET_VARIABLE must be set");
    }

    #[test]
    fn firer_defaults() {
        let config = FirerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.concurrency, 8);
    }
}
