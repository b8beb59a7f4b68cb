//! Shared fixtures for the reliable delivery tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_locks_memory::MemoryLockManager;
use relay_reliable::{
    EventEnvelope, EventHandler, ExecutionGuard, GuardConfig, HandlerError, SingleExecution,
    StaleEventHandler, StatusRecord,
};
use relay_store::{Hash, KeyType, ScanPage, Store, StoreError};
use relay_store_memory::MemoryStore;
use tokio::time::Instant;

/// Polls `condition` every 10ms until it holds, failing after `within`.
pub async fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + within;

    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {within:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Guard over fresh in-memory backends.
pub fn memory_guard(store: &MemoryStore) -> Arc<dyn SingleExecution> {
    Arc::new(ExecutionGuard::new(
        store.clone(),
        MemoryLockManager::default(),
        GuardConfig::default(),
    ))
}

/// What a [`ScriptedHandler`] does on its next call.
#[derive(Clone, Copy, Debug)]
pub enum Step {
    Succeed,
    Fail,
    RateLimit,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub event_id: String,
    pub at: Instant,
}

/// Handler that follows a script, then succeeds.
#[derive(Clone, Debug, Default)]
pub struct ScriptedHandler {
    script: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedHandler {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.calls.lock().push(Call {
            event_id: event.event_id.clone(),
            at: Instant::now(),
        });

        let step = self.script.lock().pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(()),
            Step::Fail => Err(HandlerError::failed("scripted failure")),
            Step::RateLimit => Err(HandlerError::rate_limited()),
        }
    }
}

/// Stale handler that remembers every key it was given.
#[derive(Clone, Debug, Default)]
pub struct StaleRecorder {
    keys: Arc<Mutex<Vec<String>>>,
}

impl StaleRecorder {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }
}

#[async_trait]
impl StaleEventHandler for StaleRecorder {
    async fn on_stale(&self, status_key: &str, _record: &StatusRecord) {
        self.keys.lock().push(status_key.to_string());
    }
}

#[derive(Debug)]
pub enum FlakyError {
    Memory(relay_store_memory::Error),
    Refused,
}

impl fmt::Display for FlakyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(e) => write!(f, "{e}"),
            Self::Refused => f.write_str("refused"),
        }
    }
}

impl std::error::Error for FlakyError {}

impl StoreError for FlakyError {}

/// Memory store whose reads or writes can be switched off.
#[derive(Clone, Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<(), FlakyError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(FlakyError::Refused)
        } else {
            Ok(())
        }
    }

    fn write(&self) -> Result<(), FlakyError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(FlakyError::Refused)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    type Error = FlakyError;

    async fn del(&self, key: &str) -> Result<(), Self::Error> {
        self.write()?;
        self.inner.del(key).await.map_err(FlakyError::Memory)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Self::Error> {
        self.write()?;
        self.inner.expire(key, ttl).await.map_err(FlakyError::Memory)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        self.read()?;
        self.inner.get(key).await.map_err(FlakyError::Memory)
    }

    async fn hgetall(&self, key: &str) -> Result<Hash, Self::Error> {
        self.read()?;
        self.inner.hgetall(key).await.map_err(FlakyError::Memory)
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<Hash>, Self::Error> {
        self.read()?;
        self.inner.hgetall_many(keys).await.map_err(FlakyError::Memory)
    }

    async fn hset(&self, key: &str, fields: Hash) -> Result<(), Self::Error> {
        self.write()?;
        self.inner.hset(key, fields).await.map_err(FlakyError::Memory)
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, Self::Error> {
        self.read()?;
        self.inner.key_type(key).await.map_err(FlakyError::Memory)
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), Self::Error> {
        self.write()?;
        self.inner.put(key, value, ttl).await.map_err(FlakyError::Memory)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, Self::Error> {
        self.read()?;
        self.inner.scan(cursor, pattern, count).await.map_err(FlakyError::Memory)
    }
}
