use crate::envelope::EventEnvelope;
use crate::error::{PublishError, SweepError};
use crate::status::{EventStatus, StatusRecord, StatusTracker};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use relay_messaging::{Producer, SendOptions};
use relay_store::{KeyType, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Configuration for a [`ReliableProducer`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ProducerConfig {
    /// Leading segment of every status key.
    pub key_prefix: String,

    /// Identifies this producer among others sharing the store. Random when
    /// not set.
    pub instance_id: Option<String>,

    /// Lifetime of an `assigned` record.
    pub status_ttl: Duration,

    /// Age after which an `assigned` record is reported as stale.
    pub stale_after: Duration,

    /// Pause between sweeps.
    pub sweep_interval: Duration,

    /// Keys per scan page and per status batch.
    pub scan_batch: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "relay:common:status_key".to_string(),
            instance_id: None,
            status_ttl: Duration::from_secs(120),
            stale_after: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            scan_batch: 100,
        }
    }
}

/// Called by the sweep for every record left `assigned` past `stale_after`.
#[async_trait]
pub trait StaleEventHandler
where
    Self: Send + Sync + 'static,
{
    /// Handles one stale record. Called at most once per key per sweep.
    async fn on_stale(&self, status_key: &str, record: &StatusRecord);
}

/// Logs stale events and does nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogStaleEvents;

#[async_trait]
impl StaleEventHandler for LogStaleEvents {
    async fn on_stale(&self, status_key: &str, record: &StatusRecord) {
        warn!(status_key, assigned_at = ?record.assigned_at, "event not completed in time");
    }
}

/// Totals from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys matched by the scan.
    pub scanned: usize,

    /// Completed records removed.
    pub deleted: usize,

    /// Assigned records past `stale_after`.
    pub stale: usize,

    /// Batches abandoned after a store error.
    pub failed_batches: usize,
}

/// Publishes events wrapped in envelopes and tracks them until completion.
pub struct ReliableProducer<P, S> {
    producer: P,
    status: StatusTracker<S>,
    instance_id: String,
    key_prefix: String,
    status_ttl: Duration,
    stale_after: Duration,
    sweep_interval: Duration,
    scan_batch: usize,
    stale_handler: Option<Arc<dyn StaleEventHandler>>,
}

impl<P, S> std::fmt::Debug for ReliableProducer<P, S>
where
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableProducer")
            .field("producer", &self.producer)
            .field("instance_id", &self.instance_id)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl<P, S> ReliableProducer<P, S>
where
    P: Producer,
    S: Store,
{
    /// Creates a producer. Stale records are only reported once a handler is
    /// set with [`ReliableProducer::with_stale_handler`].
    pub fn new(
        producer: P,
        store: S,
        ProducerConfig {
            key_prefix,
            instance_id,
            status_ttl,
            stale_after,
            sweep_interval,
            scan_batch,
        }: ProducerConfig,
    ) -> Self {
        Self {
            producer,
            status: StatusTracker::new(store),
            instance_id: instance_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            key_prefix,
            status_ttl,
            stale_after,
            sweep_interval,
            scan_batch: scan_batch.max(1),
            stale_handler: None,
        }
    }

    /// Sets the callback for stale records.
    #[must_use]
    pub fn with_stale_handler(mut self, handler: impl StaleEventHandler) -> Self {
        self.stale_handler = Some(Arc::new(handler));
        self
    }

    /// This producer's identity inside status keys.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Status key for an event published by this producer.
    pub fn status_key(&self, event_id: &str) -> String {
        format!("{}:{}:{event_id}", self.key_prefix, self.instance_id)
    }

    /// Starts the underlying transport producer.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn start(&self) -> Result<(), P::Error> {
        self.producer.start().await
    }

    /// Flushes and stops the underlying transport producer.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn stop(&self) -> Result<(), P::Error> {
        self.producer.stop().await
    }

    /// Wraps `payload` in a new envelope, sends it, and records it as
    /// `assigned`. The send happens first so a transport failure leaves no
    /// record behind.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Send`] if the transport failed, or
    /// [`PublishError::Untracked`] if the message went out but its record
    /// could not be written.
    #[instrument(skip(self, payload, options))]
    pub async fn publish(
        &self,
        destination: &str,
        payload: Value,
        is_idempotent: bool,
        options: SendOptions,
    ) -> Result<EventEnvelope, PublishError> {
        let envelope = EventEnvelope::new(&self.key_prefix, &self.instance_id, payload, is_idempotent);
        let encoded = envelope.to_bytes()?;
        let recorded_payload = serde_json::to_string(&envelope.payload)?;

        self.producer
            .send(destination, encoded, options)
            .await
            .map_err(|e| PublishError::Send(Box::new(e)))?;

        self.status
            .mark_assigned(&envelope, recorded_payload, self.status_ttl)
            .await
            .map_err(|e| PublishError::Untracked {
                event_id: envelope.event_id.clone(),
                source: Box::new(e),
            })?;

        debug!(event_id = %envelope.event_id, "event published");
        Ok(envelope)
    }

    /// Scans this producer's status records once. Completed records are
    /// deleted and assigned records older than `stale_after` are passed to
    /// the stale handler. Records are never deleted for being stale.
    ///
    /// A failing batch is logged and skipped; the rest of the sweep goes on.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Scan`] if the key scan itself failed.
    pub async fn sweep_once(&self) -> Result<SweepReport, SweepError> {
        let pattern = format!("{}:{}:*", self.key_prefix, self.instance_id);
        let store = self.status.store();

        let mut report = SweepReport::default();
        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(self.scan_batch);
        let mut cursor = 0;

        loop {
            let page = store
                .scan(cursor, &pattern, self.scan_batch)
                .await
                .map_err(|e| SweepError::Scan(Box::new(e)))?;

            // a scan may return the same key twice
            for key in page.keys {
                if seen.insert(key.clone()) {
                    batch.push(key);
                }
            }

            while batch.len() >= self.scan_batch {
                let keys: Vec<String> = batch.drain(..self.scan_batch).collect();
                self.sweep_batch(keys, &mut report).await;
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        if !batch.is_empty() {
            self.sweep_batch(batch, &mut report).await;
        }

        Ok(report)
    }

    async fn sweep_batch(&self, keys: Vec<String>, report: &mut SweepReport) {
        report.scanned += keys.len();

        if let Err(e) = self.try_sweep_batch(&keys, report).await {
            report.failed_batches += 1;
            error!(error = %e, keys = keys.len(), "failed to sweep status batch");
        }
    }

    async fn try_sweep_batch(
        &self,
        keys: &[String],
        report: &mut SweepReport,
    ) -> Result<(), S::Error> {
        let store = self.status.store();

        let types = try_join_all(keys.iter().map(|key| store.key_type(key))).await?;
        let hash_keys: Vec<String> = keys
            .iter()
            .zip(types)
            .filter(|(_, key_type)| *key_type == KeyType::Hash)
            .map(|(key, _)| key.clone())
            .collect();

        if hash_keys.is_empty() {
            return Ok(());
        }

        let hashes = store.hgetall_many(&hash_keys).await?;
        let now = crate::now_secs();
        let stale_after = i64::try_from(self.stale_after.as_secs()).unwrap_or(i64::MAX);

        for (key, hash) in hash_keys.iter().zip(hashes) {
            if hash.is_empty() {
                continue;
            }

            let Some(record) = StatusRecord::from_hash(&hash) else {
                warn!(status_key = %key, "skipping unrecognised status record");
                continue;
            };

            match record.status {
                EventStatus::Completed => {
                    store.del(key).await?;
                    report.deleted += 1;
                }
                EventStatus::Assigned if record.age(now) > stale_after => {
                    report.stale += 1;
                    if let Some(handler) = &self.stale_handler {
                        handler.on_stale(key, &record).await;
                    }
                }
                EventStatus::Assigned => {}
            }
        }

        Ok(())
    }

    /// Sweeps every `sweep_interval` until `shutdown` is cancelled. Errors
    /// are logged and the next sweep runs on schedule.
    pub async fn monitor(&self, shutdown: CancellationToken) {
        info!(instance_id = %self.instance_id, interval = ?self.sweep_interval, "status monitor started");

        loop {
            match self.sweep_once().await {
                Ok(report) => debug!(?report, "status sweep finished"),
                Err(e) => error!(error = %e, "status sweep failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.sweep_interval) => {}
                () = shutdown.cancelled() => break,
            }
        }

        info!(instance_id = %self.instance_id, "status monitor stopped");
    }
}
