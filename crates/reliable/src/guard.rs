use crate::envelope::EventEnvelope;
use crate::error::{GuardError, HandlerError};
use crate::status::StatusTracker;

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use relay_locks::LockManager;
use relay_store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

/// Configuration for an [`ExecutionGuard`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct GuardConfig {
    /// How long to wait for another worker's lock on the same event.
    pub lock_wait: Duration,

    /// Lifetime of a `completed` record. Duplicates arriving later run again.
    pub completed_ttl: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(30),
            completed_ttl: Duration::from_secs(60),
        }
    }
}

/// Outcome of a guarded execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Execution<T> {
    /// The event was already completed; the task did not run.
    AlreadyCompleted,

    /// The task ran and the completion was recorded.
    Executed(T),

    /// The task ran but recording the completion failed, so a duplicate may
    /// run it again.
    ExecutedUnrecorded(T),
}

impl<T> Execution<T> {
    /// Whether the task ran.
    pub const fn ran(&self) -> bool {
        !matches!(self, Self::AlreadyCompleted)
    }
}

/// Runs each event's side effects at most once across every worker sharing
/// the same store and lock backend.
///
/// Non-idempotent events take a per-event lock named `lock:{status_key}` and
/// re-check the status once it is held. Idempotent events skip the lock.
#[derive(Clone, Debug)]
pub struct ExecutionGuard<S, L> {
    status: StatusTracker<S>,
    locks: L,
    config: GuardConfig,
}

impl<S, L> ExecutionGuard<S, L>
where
    S: Store,
    L: LockManager,
{
    /// Creates a guard over `store` and `locks`.
    pub const fn new(store: S, locks: L, config: GuardConfig) -> Self {
        Self {
            status: StatusTracker::new(store),
            locks,
            config,
        }
    }

    /// Runs `task` unless the event is already completed, then records it as
    /// completed. `task` is not polled when the event is skipped.
    ///
    /// A failing task records nothing, so a redelivery runs it again.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Task`] with the task's error,
    /// [`GuardError::LockUnavailable`] if the lock was not taken within
    /// `lock_wait`, or [`GuardError::Store`] if the status could not be read.
    #[instrument(skip(self, envelope, task), fields(event_id = %envelope.event_id, idempotent = envelope.is_idempotent))]
    pub async fn execute<T, E, Fut>(
        &self,
        envelope: &EventEnvelope,
        task: Fut,
    ) -> Result<Execution<T>, GuardError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let status_key = envelope.status_key.as_str();

        if self.is_completed(status_key).await? {
            debug!("event already completed");
            return Ok(Execution::AlreadyCompleted);
        }

        if envelope.is_idempotent {
            let output = task.await.map_err(GuardError::Task)?;
            return Ok(self.complete(status_key, output).await);
        }

        let lock_key = format!("lock:{status_key}");
        let _lock = match self.locks.lock_within(&lock_key, self.config.lock_wait).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                let holder = self.locks.check(&lock_key).await.ok();
                warn!(wait = ?self.config.lock_wait, ?holder, "event lock still held by another worker");
                return Err(GuardError::LockUnavailable {
                    status_key: status_key.to_string(),
                    source: None,
                });
            }
            Err(e) => {
                return Err(GuardError::LockUnavailable {
                    status_key: status_key.to_string(),
                    source: Some(Box::new(e)),
                });
            }
        };

        // another worker may have finished while we waited
        if self.is_completed(status_key).await? {
            debug!("event completed while waiting for lock");
            return Ok(Execution::AlreadyCompleted);
        }

        let output = task.await.map_err(GuardError::Task)?;
        Ok(self.complete(status_key, output).await)
    }

    async fn is_completed<E>(&self, status_key: &str) -> Result<bool, GuardError<E>> {
        self.status.is_completed(status_key).await.map_err(store_error)
    }

    async fn complete<T>(&self, status_key: &str, output: T) -> Execution<T> {
        match self
            .status
            .mark_completed(status_key, self.config.completed_ttl)
            .await
        {
            Ok(()) => Execution::Executed(output),
            Err(e) => {
                error!(status_key, error = %e, "failed to record completion");
                Execution::ExecutedUnrecorded(output)
            }
        }
    }
}

fn store_error<E>(error: impl StoreError) -> GuardError<E> {
    GuardError::Store(Box::new(error))
}

/// Object-safe view of an [`ExecutionGuard`] for event handlers, so a
/// consumer can hold any guard without naming its backends.
#[async_trait]
pub trait SingleExecution
where
    Self: Debug + Send + Sync + 'static,
{
    /// Runs a handler future under the guard.
    async fn execute_event<'a>(
        &self,
        envelope: &EventEnvelope,
        task: BoxFuture<'a, Result<(), HandlerError>>,
    ) -> Result<Execution<()>, GuardError<HandlerError>>;
}

#[async_trait]
impl<S, L> SingleExecution for ExecutionGuard<S, L>
where
    S: Store,
    L: LockManager,
{
    async fn execute_event<'a>(
        &self,
        envelope: &EventEnvelope,
        task: BoxFuture<'a, Result<(), HandlerError>>,
    ) -> Result<Execution<()>, GuardError<HandlerError>> {
        self.execute(envelope, task).await
    }
}
