use rdkafka::error::KafkaError;
use relay_messaging::ProducerError;
use thiserror::Error;

/// Errors that can occur in the Kafka producer.
#[derive(Debug, Error)]
pub enum Error {
    /// The client could not be created.
    #[error("failed to create Kafka producer: {0}")]
    Create(#[source] KafkaError),

    /// Flushing on stop failed.
    #[error("failed to flush Kafka producer: {0}")]
    Flush(#[source] KafkaError),

    /// Delivery of a record failed.
    #[error("failed to send to {topic}: {source}")]
    Send {
        /// Target topic.
        topic: String,
        /// Underlying error.
        #[source]
        source: KafkaError,
    },
}

impl ProducerError for Error {}
