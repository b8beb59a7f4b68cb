use crate::SdkFailure;

use relay_messaging::ProducerError;
use thiserror::Error;

/// Errors that can occur in the SQS producer.
#[derive(Debug, Error)]
pub enum Error {
    /// Message bodies must be UTF-8 text.
    #[error("message body is not UTF-8: {0}")]
    Body(#[from] std::string::FromUtf8Error),

    /// `send` was called before `start`.
    #[error("producer not started")]
    NotStarted,

    /// The service call failed.
    #[error(transparent)]
    Sqs(#[from] SdkFailure),
}

impl ProducerError for Error {}
