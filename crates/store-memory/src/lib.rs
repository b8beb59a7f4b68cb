//! In-memory (single node) implementation of key-value storage for local
//! development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod glob;

pub use error::Error;

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash as _, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use relay_store::{Hash, KeyType, ScanPage, Store};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
enum Value {
    Hash(Hash),
    String(Bytes),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory key-value store. Expiry follows the tokio clock, so tests can
/// drive it with a paused runtime. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    map: Arc<Mutex<BTreeMap<String, Entry>>>,
}

impl MemoryStore {
    /// Creates a new `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let map = self.map.lock().await;

        map.get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

fn live<'a>(map: &'a mut BTreeMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();

    if map.get(key).is_some_and(|entry| !entry.is_live(now)) {
        map.remove(key);
    }

    map.get_mut(key)
}

#[async_trait]
impl Store for MemoryStore {
    type Error = Error;

    async fn del(&self, key: &str) -> Result<(), Self::Error> {
        self.map.lock().await.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Self::Error> {
        let mut map = self.map.lock().await;

        Ok(live(&mut map, key).is_some_and(|entry| {
            entry.expires_at = Some(Instant::now() + ttl);
            true
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        let mut map = self.map.lock().await;

        match live(&mut map, key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::String(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::Hash(_)) => Err(Error::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<Hash, Self::Error> {
        let mut map = self.map.lock().await;

        match live(&mut map, key).map(|entry| &entry.value) {
            None => Ok(Hash::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(Value::String(_)) => Err(Error::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<Hash>, Self::Error> {
        let mut hashes = Vec::with_capacity(keys.len());
        for key in keys {
            hashes.push(self.hgetall(key).await?);
        }
        Ok(hashes)
    }

    async fn hset(&self, key: &str, fields: Hash) -> Result<(), Self::Error> {
        let mut map = self.map.lock().await;

        match live(&mut map, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash.extend(fields),
            Some(_) => {
                return Err(Error::WrongType {
                    key: key.to_string(),
                });
            }
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(fields),
                        expires_at: None,
                    },
                );
            }
        }

        Ok(())
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, Self::Error> {
        let mut map = self.map.lock().await;

        Ok(match live(&mut map, key).map(|entry| &entry.value) {
            None => KeyType::None,
            Some(Value::Hash(_)) => KeyType::Hash,
            Some(Value::String(_)) => KeyType::String,
        })
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), Self::Error> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        self.map.lock().await.insert(
            key.to_string(),
            Entry {
                value: Value::String(value),
                expires_at,
            },
        );

        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, Self::Error> {
        let now = Instant::now();
        let mut map = self.map.lock().await;
        map.retain(|_, entry| entry.is_live(now));

        let mut ordered: Vec<(u64, &String)> = map
            .keys()
            .map(|key| (slot(key), key))
            .filter(|(slot, _)| *slot >= cursor)
            .collect();
        ordered.sort_unstable();

        // never split keys sharing a slot across pages
        let mut end = count.max(1).min(ordered.len());
        while end < ordered.len() && ordered[end].0 == ordered[end - 1].0 {
            end += 1;
        }

        let keys = ordered[..end]
            .iter()
            .filter(|(_, key)| glob::matches(pattern, key))
            .map(|(_, key)| (*key).clone())
            .collect();

        let cursor = if end == ordered.len() {
            0
        } else {
            ordered[end - 1].0.saturating_add(1)
        };

        Ok(ScanPage { cursor, keys })
    }
}

/// Scan position of a key. Ordering by slot keeps the cursor valid while keys
/// are added or removed between pages.
fn slot(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
