//! Relay error handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("log broker error: {0}")]
    Broker(#[from] redis::RedisError),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
