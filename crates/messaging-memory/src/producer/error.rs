use relay_messaging::ProducerError;
use thiserror::Error;

/// Errors that can occur in a memory producer.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The producer was stopped.
    #[error("producer stopped")]
    Stopped,
}

impl ProducerError for Error {}
