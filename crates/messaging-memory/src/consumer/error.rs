use relay_messaging::ConsumerError;
use thiserror::Error;

/// Errors that can occur in a memory consumer.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// `receive` was called before `start`.
    #[error("consumer not started")]
    NotStarted,

    /// The receipt was already settled or belongs to another consumer.
    #[error("unknown receipt {0}")]
    UnknownReceipt(u64),
}

impl ConsumerError for Error {}
