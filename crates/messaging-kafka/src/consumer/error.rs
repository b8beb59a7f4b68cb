use rdkafka::error::KafkaError;
use relay_messaging::ConsumerError;
use thiserror::Error;

/// Errors that can occur in the Kafka consumer.
#[derive(Debug, Error)]
pub enum Error {
    /// Offset commit failed.
    #[error("failed to commit offset: {0}")]
    Commit(#[source] KafkaError),

    /// The client could not be created.
    #[error("failed to create Kafka consumer: {0}")]
    Create(#[source] KafkaError),

    /// Pausing or resuming the assignment failed.
    #[error("failed to change partition flow: {0}")]
    Flow(#[source] KafkaError),

    /// Polling failed.
    #[error("failed to receive message: {0}")]
    Receive(#[source] KafkaError),

    /// Rewinding a partition for redelivery failed.
    #[error("failed to seek {topic}[{partition}] to {offset}: {source}")]
    Seek {
        /// Topic.
        topic: String,
        /// Partition.
        partition: i32,
        /// Offset that should have been redelivered.
        offset: i64,
        /// Underlying error.
        #[source]
        source: KafkaError,
    },

    /// Subscribing to the topic failed.
    #[error("failed to subscribe: {0}")]
    Subscribe(#[source] KafkaError),
}

impl ConsumerError for Error {}
