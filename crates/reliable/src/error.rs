use std::time::Duration;

use thiserror::Error;

/// Type-erased error from a backend or handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from [`crate::ExecutionGuard::execute`].
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The per-event lock could not be taken within the wait bound, or the
    /// lock backend failed.
    #[error("lock unavailable for {status_key}")]
    LockUnavailable {
        /// Status key of the event.
        status_key: String,
        /// Backend failure, if that was the cause.
        #[source]
        source: Option<BoxError>,
    },

    /// Reading the status record failed.
    #[error("status store failed: {0}")]
    Store(#[source] BoxError),

    /// The task itself failed. Nothing was recorded.
    #[error(transparent)]
    Task(E),
}

/// Errors returned by an [`crate::EventHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An upstream rate limit was hit. The event is redelivered after the
    /// consumer has cooled down.
    #[error("rate limited")]
    RateLimited {
        /// Cool-down before resuming, overriding the consumer default.
        retry_after: Option<Duration>,
    },

    /// Any other failure. The event is redelivered.
    #[error(transparent)]
    Failed(BoxError),
}

impl HandlerError {
    /// Wraps any error as a failure.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    /// A rate-limit signal using the consumer's default cool-down.
    #[must_use]
    pub const fn rate_limited() -> Self {
        Self::RateLimited { retry_after: None }
    }
}

/// Errors from [`crate::ReliableProducer::publish`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport rejected the message. Nothing was recorded.
    #[error("failed to send event: {0}")]
    Send(#[source] BoxError),

    /// The message was sent but its status record could not be written, so
    /// the sweep will not track it.
    #[error("event {event_id} sent but not tracked: {source}")]
    Untracked {
        /// Id of the sent event.
        event_id: String,
        /// Store failure.
        #[source]
        source: BoxError,
    },
}

/// Errors from [`crate::ReliableProducer::sweep_once`].
#[derive(Debug, Error)]
pub enum SweepError {
    /// Scanning the store failed.
    #[error("failed to scan status records: {0}")]
    Scan(#[source] BoxError),
}

/// Errors from [`crate::ReliableConsumer::new`].
#[derive(Debug, Error)]
pub enum ConsumerSetupError {
    /// Deduplication needs an execution guard.
    #[error("deduplication enabled without an execution guard")]
    DedupWithoutGuard,

    /// At least one worker is needed.
    #[error("no consumers given")]
    NoWorkers,
}
