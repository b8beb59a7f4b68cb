use relay_store::StoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The operation does not apply to the type stored under the key.
    #[error("wrong type of value stored at {key}")]
    WrongType {
        /// Offending key.
        key: String,
    },
}

impl StoreError for Error {}
