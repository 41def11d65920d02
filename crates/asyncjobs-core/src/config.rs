//! Top-level configuration composing the manager, worker pool, recovery
//! service, and (optionally) the distributed store, loaded the same way
//! the teacher loads its own config: a TOML file overlaid with
//! `ASYNCJOBS__`-prefixed environment variables via the `config` crate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::RedisConfig;
use crate::manager::JobManagerConfig;
use crate::recovery::RecoveryConfig;
use crate::worker::WorkerPoolConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub manager: JobManagerConfigToml,

    #[serde(default)]
    pub worker_pool: WorkerPoolConfigToml,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Present only when the distributed Redis store is in use; absent
    /// means the in-memory store, which needs no connection info.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            manager: JobManagerConfigToml::default(),
            worker_pool: WorkerPoolConfigToml::default(),
            recovery: RecoveryConfig::default(),
            redis: None,
        }
    }
}

impl Config {
    /// Loads `path` as TOML with no environment overlay. Used directly by
    /// tests and by `from_env` once a path has been located.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        let config: Config = toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Locates a config file (`ASYNCJOBS_CONFIG` env var, then a handful of
    /// conventional paths, then built-in defaults), and overlays
    /// `ASYNCJOBS__SECTION__KEY`-style environment variables on top, e.g.
    /// `ASYNCJOBS__WORKER_POOL__MAXIMUM_CONCURRENCY=16`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        let explicit_path = std::env::var("ASYNCJOBS_CONFIG").ok();
        let default_paths = ["./config/default.toml", "./config/production.toml", "/etc/asyncjobs/config.toml"];

        if let Some(path) = explicit_path {
            builder = builder.add_source(config::File::with_name(&path));
        } else if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ASYNCJOBS")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder.build().map_err(|e| ConfigError::Parse(e.to_string()))?;
        let config: Config = built
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.default_max_retries > 100 {
            return Err(ConfigError::Invalid("default_max_retries is unreasonably large".into()));
        }
        if self.worker_pool.maximum_concurrency == 0 {
            return Err(ConfigError::Invalid("worker_pool.maximum_concurrency must be > 0".into()));
        }
        Ok(())
    }

    pub fn job_manager_config(&self) -> JobManagerConfig {
        JobManagerConfig {
            default_max_retries: self.manager.default_max_retries,
            retry_delay_base_seconds: self.manager.retry_delay_base_seconds,
        }
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            maximum_concurrency: self.worker_pool.maximum_concurrency,
            maximum_queue_size: self.worker_pool.maximum_queue_size,
            polling_interval_ms: self.worker_pool.polling_interval_ms,
            error_backoff_ms: self.worker_pool.error_backoff_ms,
            job_timeout_minutes: self.worker_pool.job_timeout_minutes,
            shutdown_grace_seconds: self.worker_pool.shutdown_grace_seconds,
        }
    }
}

/// Serializable mirror of [`JobManagerConfig`]; kept distinct so the
/// manager's own type doesn't need to derive (De)Serialize for callers
/// that construct it directly in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManagerConfigToml {
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_retry_base")]
    pub retry_delay_base_seconds: f64,
}

impl Default for JobManagerConfigToml {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            retry_delay_base_seconds: default_retry_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfigToml {
    #[serde(default = "default_concurrency")]
    pub maximum_concurrency: usize,
    #[serde(default = "default_queue_size")]
    pub maximum_queue_size: usize,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_job_timeout_minutes")]
    pub job_timeout_minutes: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for WorkerPoolConfigToml {
    fn default() -> Self {
        let fallback = WorkerPoolConfig::default();
        Self {
            maximum_concurrency: fallback.maximum_concurrency,
            maximum_queue_size: fallback.maximum_queue_size,
            polling_interval_ms: fallback.polling_interval_ms,
            error_backoff_ms: fallback.error_backoff_ms,
            job_timeout_minutes: fallback.job_timeout_minutes,
            shutdown_grace_seconds: fallback.shutdown_grace_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_base() -> f64 {
    2.0
}
fn default_concurrency() -> usize {
    4
}
fn default_queue_size() -> usize {
    100
}
fn default_polling_interval_ms() -> u64 {
    500
}
fn default_error_backoff_ms() -> u64 {
    2000
}
fn default_job_timeout_minutes() -> u64 {
    5
}
fn default_shutdown_grace_seconds() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}
