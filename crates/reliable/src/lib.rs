//! Exactly-once event execution on top of interchangeable transports.
//!
//! Producers wrap every payload in an [`EventEnvelope`] and record it as
//! `assigned` in a shared store. Consumers run each event through an
//! [`ExecutionGuard`], which skips events already recorded as `completed` and
//! serialises non-idempotent ones behind a distributed lock. The producer's
//! sweep deletes completed records and reports ones left `assigned` too long.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod envelope;
mod error;
mod guard;
mod producer;
mod status;

pub use consumer::{ConsumerConfig, EventHandler, ReliableConsumer, WorkerState};
pub use envelope::EventEnvelope;
pub use error::{BoxError, ConsumerSetupError, GuardError, HandlerError, PublishError, SweepError};
pub use guard::{Execution, ExecutionGuard, GuardConfig, SingleExecution};
pub use producer::{LogStaleEvents, ProducerConfig, ReliableProducer, StaleEventHandler, SweepReport};
pub use status::{EventStatus, StatusRecord, StatusTracker};

/// Seconds since the Unix epoch.
pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
