//! Bus error types.

use thiserror::Error;

/// Pub/sub and lease errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("subscribe failed on {0}: {1}")]
    Subscribe(String, String),

    #[error("bus is closed")]
    Closed,
}

impl From<deadpool_redis::PoolError> for BusError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        BusError::Connection(e.to_string())
    }
}

impl From<redis::RedisError> for BusError {
    fn from(e: redis::RedisError) -> Self {
        BusError::Redis(e.to_string())
    }
}

pub type BusResult<T> = Result<T, BusError>;
