//! Redis connection pooling for the distributed job store.
//!
//! ## Performance characteristics
//!
//! - Connection pooling via `redis::aio::ConnectionManager`: reduces
//!   connection overhead
//! - Pipeline support for batched writes (`update`'s hash-write + zset
//!   re-index)
//! - Script support for the atomic claim and recovery-reclaim operations
//! - Async operations throughout: non-blocking Redis calls
//! - Automatic reconnection with backoff on failure

pub mod config;
pub mod connection;

pub use config::RedisConfig;
pub use connection::{PoolStats, RedisConnection, RedisPool};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Operation failed: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Key not found: {0}")]
    NotFound(String),
}

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
}
