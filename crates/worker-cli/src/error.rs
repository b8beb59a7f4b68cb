use thiserror::Error;

/// Errors that end the worker.
#[derive(Debug, Error)]
pub enum Error {
    /// The HTTP client could not be built.
    #[error(transparent)]
    Http(#[from] relay_http_client::Error),

    /// Kafka consumer failure.
    #[error(transparent)]
    KafkaConsumer(#[from] relay_messaging_kafka::consumer::Error),

    /// Kafka producer failure.
    #[error(transparent)]
    KafkaProducer(#[from] relay_messaging_kafka::producer::Error),

    /// Redis lock manager failure.
    #[error(transparent)]
    Locks(#[from] relay_locks_redis::Error),

    /// The payload argument is not JSON.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] relay_reliable::PublishError),

    /// The consumer could not be assembled.
    #[error(transparent)]
    Setup(#[from] relay_reliable::ConsumerSetupError),

    /// SQS consumer failure.
    #[error(transparent)]
    SqsConsumer(#[from] relay_messaging_sqs::consumer::Error),

    /// SQS producer failure.
    #[error(transparent)]
    SqsProducer(#[from] relay_messaging_sqs::producer::Error),

    /// Redis store failure.
    #[error(transparent)]
    Store(#[from] relay_store_redis::Error),
}
