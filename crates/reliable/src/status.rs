use crate::envelope::EventEnvelope;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use relay_store::{Hash, Store};
use tracing::trace;

const STATUS: &str = "status";
const ASSIGNED_AT: &str = "assigned_at";
const COMPLETED_AT: &str = "completed_at";
const PAYLOAD: &str = "payload";

/// Lifecycle state of an event's status record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    /// Published, not yet completed.
    Assigned,

    /// A consumer finished the event.
    Completed,
}

impl EventStatus {
    /// Value stored in the `status` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "completed" => Ok(Self::Completed),
            other => Err(other.to_string()),
        }
    }
}

/// Decoded status hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRecord {
    /// Current state.
    pub status: EventStatus,

    /// Seconds since the epoch when the event was published.
    pub assigned_at: Option<i64>,

    /// Seconds since the epoch when a consumer finished the event.
    pub completed_at: Option<i64>,

    /// JSON of the full envelope, if the producer stored it.
    pub payload: Option<String>,
}

impl StatusRecord {
    /// Decodes a status hash. Returns `None` for an empty hash or an
    /// unrecognised `status` field.
    #[must_use]
    pub fn from_hash(hash: &Hash) -> Option<Self> {
        let status = hash.get(STATUS)?.parse().ok()?;
        let timestamp = |field: &str| hash.get(field).and_then(|value| value.parse().ok());

        Some(Self {
            status,
            assigned_at: timestamp(ASSIGNED_AT),
            completed_at: timestamp(COMPLETED_AT),
            payload: hash.get(PAYLOAD).cloned(),
        })
    }

    /// Whether the record is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == EventStatus::Completed
    }

    /// Seconds between `assigned_at` and `now`. Zero when not recorded.
    #[must_use]
    pub fn age(&self, now: i64) -> i64 {
        self.assigned_at.map_or(0, |assigned_at| now - assigned_at)
    }
}

/// Reads and writes per-event status hashes.
#[derive(Clone, Debug)]
pub struct StatusTracker<S> {
    store: S,
}

impl<S: Store> StatusTracker<S> {
    /// Creates a tracker over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Records a freshly published event as `assigned`, keeping its
    /// serialized payload for inspection, and bounds the record's lifetime.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn mark_assigned(
        &self,
        envelope: &EventEnvelope,
        payload: String,
        ttl: Duration,
    ) -> Result<(), S::Error> {
        let fields = Hash::from([
            (STATUS.to_string(), EventStatus::Assigned.to_string()),
            (ASSIGNED_AT.to_string(), crate::now_secs().to_string()),
            (PAYLOAD.to_string(), payload),
        ]);

        self.store.hset(&envelope.status_key, fields).await?;
        self.store.expire(&envelope.status_key, ttl).await?;

        trace!(status_key = %envelope.status_key, "marked event assigned");
        Ok(())
    }

    /// Records an event as `completed`. The record expires after `ttl`, which
    /// bounds how long late duplicates are recognised.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn mark_completed(&self, status_key: &str, ttl: Duration) -> Result<(), S::Error> {
        let fields = Hash::from([
            (STATUS.to_string(), EventStatus::Completed.to_string()),
            (COMPLETED_AT.to_string(), crate::now_secs().to_string()),
        ]);

        self.store.hset(status_key, fields).await?;
        self.store.expire(status_key, ttl).await?;

        trace!(status_key, "marked event completed");
        Ok(())
    }

    /// Reads a status record.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn record(&self, status_key: &str) -> Result<Option<StatusRecord>, S::Error> {
        let hash = self.store.hgetall(status_key).await?;
        Ok(StatusRecord::from_hash(&hash))
    }

    /// Whether the event is recorded as completed.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn is_completed(&self, status_key: &str) -> Result<bool, S::Error> {
        Ok(self
            .record(status_key)
            .await?
            .is_some_and(|record| record.is_completed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use relay_store_memory::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_from_hash_ignores_unknown_status() {
        assert_eq!(StatusRecord::from_hash(&Hash::new()), None);

        let hash = Hash::from([("status".to_string(), "exploded".to_string())]);
        assert_eq!(StatusRecord::from_hash(&hash), None);
    }

    #[test]
    fn test_age_from_assigned_at() {
        let hash = Hash::from([
            ("status".to_string(), "assigned".to_string()),
            ("assigned_at".to_string(), "100".to_string()),
        ]);
        let record = StatusRecord::from_hash(&hash).unwrap();

        assert_eq!(record.age(161), 61);
        assert!(!record.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_assigned_then_completed() {
        let store = MemoryStore::new();
        let tracker = StatusTracker::new(store.clone());
        let envelope = EventEnvelope::new("p", "i", json!({}), false);

        tracker
            .mark_assigned(&envelope, "{}".to_string(), Duration::from_secs(120))
            .await
            .unwrap();

        let record = tracker.record(&envelope.status_key).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Assigned);
        assert_eq!(record.payload.as_deref(), Some("{}"));
        assert!(!tracker.is_completed(&envelope.status_key).await.unwrap());

        tracker
            .mark_completed(&envelope.status_key, Duration::from_secs(60))
            .await
            .unwrap();

        let record = tracker.record(&envelope.status_key).await.unwrap().unwrap();
        assert!(record.is_completed());
        assert!(record.completed_at.is_some());
        // fields from the assigned write survive
        assert!(record.assigned_at.is_some());
        assert_eq!(store.ttl(&envelope.status_key).await, Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_record_expires() {
        let tracker = StatusTracker::new(MemoryStore::new());

        tracker
            .mark_completed("p:i:e", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(tracker.is_completed("p:i:e").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!tracker.is_completed("p:i:e").await.unwrap());
    }
}
