use crate::envelope::EventEnvelope;
use crate::error::{ConsumerSetupError, GuardError, HandlerError};
use crate::guard::{Execution, SingleExecution};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use relay_messaging::{Consumer, Disposition};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for a [`ReliableConsumer`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ConsumerConfig {
    /// Run every event through the execution guard.
    pub deduplicate: bool,

    /// How long a rate-limited worker stays paused.
    pub resume_after: Duration,

    /// Delay before fetching again after a failed event or receive.
    pub redeliver_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            deduplicate: true,
            resume_after: Duration::from_secs(60),
            redeliver_delay: Duration::from_secs(1),
        }
    }
}

/// Application logic for one kind of event.
#[async_trait]
pub trait EventHandler
where
    Self: Send + Sync + 'static,
{
    /// Handles one event. Returning an error leaves the event for
    /// redelivery; [`HandlerError::RateLimited`] also pauses the worker.
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;
}

/// Observable state of one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Fetching and handling events.
    Running,

    /// Cooling down after a rate limit.
    Paused,

    /// Not fetching: shut down, or [`ReliableConsumer::run`] not started yet.
    Stopped,
}

/// Runs an [`EventHandler`] on several workers, each owning one consumer
/// connection to the same destination.
#[derive(Debug)]
pub struct ReliableConsumer<C, H> {
    workers: Vec<Arc<C>>,
    handler: H,
    guard: Option<Arc<dyn SingleExecution>>,
    config: ConsumerConfig,
    running: AtomicBool,
}

impl<C, H> ReliableConsumer<C, H>
where
    C: Consumer,
    H: EventHandler,
{
    /// Creates a consumer with one worker per entry in `consumers`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerSetupError::DedupWithoutGuard`] if deduplication is
    /// on but no guard is given, or [`ConsumerSetupError::NoWorkers`] if
    /// `consumers` is empty.
    pub fn new(
        consumers: Vec<C>,
        handler: H,
        guard: Option<Arc<dyn SingleExecution>>,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerSetupError> {
        if config.deduplicate && guard.is_none() {
            return Err(ConsumerSetupError::DedupWithoutGuard);
        }

        if consumers.is_empty() {
            return Err(ConsumerSetupError::NoWorkers);
        }

        Ok(Self {
            workers: consumers.into_iter().map(Arc::new).collect(),
            handler,
            guard,
            config,
            running: AtomicBool::new(false),
        })
    }

    /// The worker connections, in worker order.
    pub fn workers(&self) -> &[Arc<C>] {
        &self.workers
    }

    /// Current state of each worker.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        let running = self.running.load(Ordering::SeqCst);

        self.workers
            .iter()
            .map(|worker| match (running, worker.is_paused()) {
                (false, _) => WorkerState::Stopped,
                (true, true) => WorkerState::Paused,
                (true, false) => WorkerState::Running,
            })
            .collect()
    }

    /// Starts every consumer and runs the workers until `shutdown` is
    /// cancelled, then stops every consumer.
    ///
    /// # Errors
    ///
    /// Returns the first consumer's start error. Consumers already started
    /// are stopped again.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), C::Error> {
        for (index, worker) in self.workers.iter().enumerate() {
            if let Err(e) = worker.start().await {
                error!(worker = index, error = %e, "failed to start consumer");
                self.stop_all().await;
                return Err(e);
            }
        }

        self.running.store(true, Ordering::SeqCst);
        info!(workers = self.workers.len(), "reliable consumer started");

        join_all(
            self.workers
                .iter()
                .enumerate()
                .map(|(index, worker)| self.work(index, worker, &shutdown)),
        )
        .await;

        self.stop_all().await;
        Ok(())
    }

    /// Stops every consumer. Errors are logged.
    pub async fn stop_all(&self) {
        for (index, worker) in self.workers.iter().enumerate() {
            if let Err(e) = worker.stop().await {
                error!(worker = index, error = %e, "failed to stop consumer");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("reliable consumer stopped");
    }

    #[instrument(skip(self, worker, shutdown))]
    async fn work(&self, index: usize, worker: &Arc<C>, shutdown: &CancellationToken) {
        loop {
            let received = tokio::select! {
                received = worker.receive() => received,
                () = shutdown.cancelled() => break,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    debug!("consumer closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to receive message");
                    if !self.backoff(shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let (payload, receipt) = delivery.into_parts();
            let (disposition, cool_down) = self.process(&payload).await;

            if let Err(e) = worker.settle(receipt, disposition).await {
                error!(error = %e, ?disposition, "failed to settle message");
            }

            match disposition {
                Disposition::Ack => {}
                Disposition::Redeliver => {
                    if !self.backoff(shutdown).await {
                        break;
                    }
                }
                Disposition::RedeliverAndPause => {
                    schedule_resume(worker.clone(), index, cool_down, shutdown.child_token());
                }
            }
        }
    }

    /// Runs one message through the handler and decides how to settle it.
    async fn process(&self, payload: &[u8]) -> (Disposition, Duration) {
        let envelope = match EventEnvelope::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "dropping malformed envelope");
                return (Disposition::Ack, Duration::ZERO);
            }
        };

        let result = match &self.guard {
            Some(guard) if self.config.deduplicate => {
                guard
                    .execute_event(&envelope, self.handler.handle(&envelope))
                    .await
            }
            _ => self
                .handler
                .handle(&envelope)
                .await
                .map(Execution::Executed)
                .map_err(GuardError::Task),
        };

        let event_id = envelope.event_id.as_str();

        match result {
            Ok(Execution::AlreadyCompleted) => {
                debug!(event_id, "skipping completed event");
                (Disposition::Ack, Duration::ZERO)
            }
            Ok(Execution::Executed(())) => {
                debug!(event_id, "event handled");
                (Disposition::Ack, Duration::ZERO)
            }
            Ok(Execution::ExecutedUnrecorded(())) => {
                warn!(event_id, "event handled but completion not recorded");
                (Disposition::Ack, Duration::ZERO)
            }
            Err(GuardError::Task(HandlerError::RateLimited { retry_after })) => {
                let cool_down = retry_after.unwrap_or(self.config.resume_after);
                warn!(event_id, ?cool_down, "rate limited; pausing worker");
                (Disposition::RedeliverAndPause, cool_down)
            }
            Err(e) => {
                error!(event_id, error = %e, "event failed; leaving for redelivery");
                (Disposition::Redeliver, Duration::ZERO)
            }
        }
    }

    /// Waits `redeliver_delay`. Returns `false` if shut down meanwhile.
    async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.config.redeliver_delay) => true,
            () = shutdown.cancelled() => false,
        }
    }
}

fn schedule_resume<C: Consumer>(
    worker: Arc<C>,
    index: usize,
    after: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(after) => {}
            () = shutdown.cancelled() => return,
        }

        match worker.resume().await {
            Ok(true) => info!(worker = index, "worker resumed after cool-down"),
            Ok(false) => debug!(worker = index, "worker was not paused"),
            Err(e) => error!(worker = index, error = %e, "failed to resume worker"),
        }
    });
}
