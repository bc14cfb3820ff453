//! Worker process configuration.

use std::fmt;
use std::str::FromStr;

use iris_conductor::config::{env_or, env_required, ConfigError, DispatchConfig, FirerConfig};

/// Which store implementation backs the conductor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local, lost on restart. For local runs only.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("expected postgres or memory, got {other}")),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected text or json, got {other}")),
        }
    }
}

/// SQS long-polling settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_url: String,
    /// Override for local SQS emulators.
    pub endpoint_url: Option<String>,
    /// Long-poll wait, 0 to 20 seconds.
    pub wait_time_secs: i32,
    /// Messages per receive, 1 to 10.
    pub max_messages: i32,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub store_backend: StoreBackend,
    /// Required for the Postgres backend.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub queue: QueueConfig,
    pub log_format: LogFormat,
    pub dispatch: DispatchConfig,
    pub firer: FirerConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Default    |
    /// |----------------------------|------------|
    /// | `STORE_BACKEND`            | `postgres` |
    /// | `DATABASE_URL`             | required for `postgres` |
    /// | `DATABASE_MAX_CONNECTIONS` | `20`       |
    /// | `SQS_QUEUE_URL`            | required   |
    /// | `SQS_ENDPOINT_URL`         | unset      |
    /// | `SQS_WAIT_TIME_SECS`       | `20`       |
    /// | `SQS_MAX_MESSAGES`         | `10`       |
    /// | `LOG_FORMAT`               | `text`     |
    ///
    /// Dispatch and firer settings are read by [`DispatchConfig::from_env`]
    /// and [`FirerConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = env_or("STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = match store_backend {
            StoreBackend::Postgres => Some(env_required("DATABASE_URL")?),
            StoreBackend::Memory => None,
        };

        let queue = QueueConfig {
            queue_url: env_required("SQS_QUEUE_URL")?,
            endpoint_url: std::env::var("SQS_ENDPOINT_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            wait_time_secs: env_or::<i32>("SQS_WAIT_TIME_SECS", 20)?.clamp(0, 20),
            max_messages: env_or::<i32>("SQS_MAX_MESSAGES", 10)?.clamp(1, 10),
        };

        Ok(Self {
            store_backend,
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 20)?,
            queue,
            log_format: env_or("LOG_FORMAT", LogFormat::Text)?,
            dispatch: DispatchConfig::from_env()?,
            firer: FirerConfig::from_env()?,
        })
    }
}
