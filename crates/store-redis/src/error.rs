use relay_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the Redis store.
#[derive(Debug, Error)]
pub enum Error {
    /// A command failed or the connection dropped.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError for Error {}
