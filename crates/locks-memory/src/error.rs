use relay_locks::LockManagerError;
use thiserror::Error;

/// Errors that can occur in the memory lock manager.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Locks must expire.
    #[error("lock ttl must be greater than zero")]
    ZeroTtl,
}

impl LockManagerError for Error {}
