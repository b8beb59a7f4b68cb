mod error;

pub use error::Error;

use crate::Queue;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_messaging::{AckGate, Consumer, Delivery, Disposition, PauseSwitch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Identifies an unsettled memory delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryReceipt(u64);

#[derive(Debug)]
struct Inner {
    name: String,
    queue: Arc<Queue>,
    switch: PauseSwitch,
    gate: AckGate,
    started: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    in_flight: Mutex<HashMap<u64, Bytes>>,
    next_receipt: AtomicU64,
    broker_pauses: AtomicUsize,
    broker_resumes: AtomicUsize,
}

/// Consumer of one queue on a [`crate::MemoryBroker`]. Clones share the same
/// connection.
#[derive(Clone, Debug)]
pub struct MemoryConsumer {
    inner: Arc<Inner>,
}

impl MemoryConsumer {
    pub(crate) fn new(name: String, queue: Arc<Queue>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                queue,
                switch: PauseSwitch::new(),
                gate: AckGate::new(),
                started: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_receipt: AtomicU64::new(0),
                broker_pauses: AtomicUsize::new(0),
                broker_resumes: AtomicUsize::new(0),
            }),
        }
    }

    /// Pause transitions that reached the broker.
    #[must_use]
    pub fn broker_pauses(&self) -> usize {
        self.inner.broker_pauses.load(Ordering::SeqCst)
    }

    /// Resume transitions that reached the broker.
    #[must_use]
    pub fn broker_resumes(&self) -> usize {
        self.inner.broker_resumes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    type Error = Error;
    type Receipt = MemoryReceipt;

    async fn start(&self) -> Result<(), Self::Error> {
        {
            let mut shutdown = self.inner.shutdown.lock();
            if shutdown.is_cancelled() {
                *shutdown = CancellationToken::new();
            }
        }
        self.inner.started.store(true, Ordering::SeqCst);
        info!(queue = %self.inner.name, "memory consumer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        self.inner.shutdown.lock().cancel();

        let unsettled: Vec<Bytes> = self.inner.in_flight.lock().drain().map(|(_, m)| m).collect();
        for message in unsettled {
            self.inner.queue.push_front(message);
        }

        info!(queue = %self.inner.name, "memory consumer stopped");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery<Self::Receipt>>, Self::Error> {
        let inner = &self.inner;

        if !inner.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        let shutdown = inner.shutdown.lock().clone();

        loop {
            tokio::select! {
                () = inner.switch.wait_running() => {}
                () = shutdown.cancelled() => return Ok(None),
            }

            let arrived = inner.queue.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if let Some(payload) = inner.queue.pop() {
                let id = inner.next_receipt.fetch_add(1, Ordering::SeqCst);
                inner.in_flight.lock().insert(id, payload.clone());

                debug!(queue = %inner.name, receipt = id, "delivering message");
                return Ok(Some(Delivery::new(payload, MemoryReceipt(id))));
            }

            tokio::select! {
                () = &mut arrived => {}
                () = shutdown.cancelled() => return Ok(None),
            }
        }
    }

    async fn settle(
        &self,
        receipt: Self::Receipt,
        disposition: Disposition,
    ) -> Result<(), Self::Error> {
        let inner = &self.inner;
        let disposition = inner.gate.apply(disposition);

        let payload = inner
            .in_flight
            .lock()
            .remove(&receipt.0)
            .ok_or(Error::UnknownReceipt(receipt.0))?;

        if disposition.acknowledges() {
            inner.queue.acked.fetch_add(1, Ordering::SeqCst);
            debug!(queue = %inner.name, receipt = receipt.0, "acknowledged");
        } else {
            inner.queue.redelivered.fetch_add(1, Ordering::SeqCst);
            inner.queue.push_front(payload);
            debug!(queue = %inner.name, receipt = receipt.0, "returned for redelivery");
        }

        if disposition.pauses() {
            self.pause().await?;
        }

        Ok(())
    }

    async fn pause(&self) -> Result<bool, Self::Error> {
        let changed = self.inner.switch.pause();

        if changed {
            self.inner.broker_pauses.fetch_add(1, Ordering::SeqCst);
            info!(queue = %self.inner.name, "memory consumer paused");
        }

        Ok(changed)
    }

    async fn resume(&self) -> Result<bool, Self::Error> {
        let changed = self.inner.switch.resume();

        if changed {
            self.inner.broker_resumes.fetch_add(1, Ordering::SeqCst);
            info!(queue = %self.inner.name, "memory consumer resumed");
        }

        Ok(changed)
    }

    async fn cancel(&self) -> Result<(), Self::Error> {
        self.inner.gate.arm();
        debug!(queue = %self.inner.name, "next acknowledgment suppressed");
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.inner.switch.is_paused()
    }
}
