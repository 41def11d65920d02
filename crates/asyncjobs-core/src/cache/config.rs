//! Redis connection configuration for the distributed job store.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server URL (redis://host:port/db)
    pub url: String,

    #[serde(default = "default_false")]
    pub use_tls: bool,

    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_timeout")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_timeout")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub retry_on_failure: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Key prefix for job hashes / ready set (defaults to "ae", matching
    /// the `ae:job:{id}` / `ae:jobs:queue` layout).
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub database: u8,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            use_tls: false,
            verify_certificate: true,
            pool_size: 20,
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            retry_on_failure: true,
            max_retries: 3,
            retry_delay_ms: 1000,
            key_prefix: "ae".to_string(),
            password: None,
            database: 0,
        }
    }
}

impl RedisConfig {
    pub fn development() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            pool_size: 5,
            connect_timeout_ms: 2000,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self {
            url: "redis://redis-cluster:6379/0".to_string(),
            use_tls: true,
            verify_certificate: true,
            pool_size: 50,
            connect_timeout_ms: 3000,
            retry_on_failure: true,
            max_retries: 5,
            retry_delay_ms: 500,
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_pool_size() -> usize {
    20
}
fn default_timeout() -> u64 {
    5000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_key_prefix() -> String {
    "ae".to_string()
}
