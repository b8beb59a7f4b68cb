use relay_locks::LockManagerError;
use thiserror::Error;

/// Errors that can occur when using the Redis lock manager.
#[derive(Debug, Error)]
pub enum Error {
    /// A command failed or the connection dropped.
    #[error("redis lock operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Locks must expire.
    #[error("lock ttl must be at least one millisecond")]
    ZeroTtl,
}

impl LockManagerError for Error {}
