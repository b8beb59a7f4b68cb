use crate::SdkFailure;

use relay_messaging::ConsumerError;
use thiserror::Error;

/// Errors that can occur in the SQS consumer.
#[derive(Debug, Error)]
pub enum Error {
    /// `receive` or `settle` was called before `start` or after `stop`.
    #[error("consumer not started")]
    NotStarted,

    /// The service call failed.
    #[error(transparent)]
    Sqs(#[from] SdkFailure),
}

impl ConsumerError for Error {}
