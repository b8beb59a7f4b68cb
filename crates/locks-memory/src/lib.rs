//! In-memory (single node) implementation of locks for local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_locks::{LockManager, LockStatus};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Configuration for the `MemoryLockManager`.
#[derive(Clone, Debug)]
pub struct MemoryLockManagerConfig {
    /// A unique identifier for this lock manager instance.
    pub local_identifier: String,

    /// TTL for locks. A lock whose guard is never dropped frees itself after this.
    pub ttl: Duration,
}

impl Default for MemoryLockManagerConfig {
    fn default() -> Self {
        Self {
            local_identifier: "local".to_string(),
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Holder {
    identifier: String,
    token: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Table {
    held: Mutex<HashMap<String, Holder>>,
    released: Notify,
    next_token: AtomicU64,
}

/// In-memory lock manager. Managers created with [`MemoryLockManager::sibling`]
/// share one lock table but report their own identity, which stands in for
/// separate processes in tests.
#[derive(Clone, Debug)]
pub struct MemoryLockManager {
    table: Arc<Table>,
    local_identifier: String,
    ttl: Duration,
}

impl MemoryLockManager {
    /// Creates a new instance of `MemoryLockManager`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroTtl`] if `ttl` is zero.
    pub fn new(
        MemoryLockManagerConfig {
            local_identifier,
            ttl,
        }: MemoryLockManagerConfig,
    ) -> Result<Self, Error> {
        if ttl.is_zero() {
            return Err(Error::ZeroTtl);
        }

        Ok(Self {
            table: Arc::new(Table::default()),
            local_identifier,
            ttl,
        })
    }

    /// A manager with a different identity over the same lock table.
    #[must_use]
    pub fn sibling(&self, local_identifier: impl Into<String>) -> Self {
        Self {
            table: self.table.clone(),
            local_identifier: local_identifier.into(),
            ttl: self.ttl,
        }
    }

    /// Takes the lock if free or expired; otherwise returns when the current
    /// holder expires.
    fn try_acquire(&self, resource_id: &str) -> Result<MemoryLockGuard, Instant> {
        let now = Instant::now();
        let mut held = self.table.held.lock();

        if let Some(holder) = held.get(resource_id).filter(|h| h.expires_at > now) {
            return Err(holder.expires_at);
        }

        let token = self.table.next_token.fetch_add(1, Ordering::SeqCst);
        held.insert(
            resource_id.to_string(),
            Holder {
                identifier: self.local_identifier.clone(),
                token,
                expires_at: now + self.ttl,
            },
        );

        debug!(key = %resource_id, local_id = %self.local_identifier, "lock acquired");

        Ok(MemoryLockGuard {
            table: self.table.clone(),
            resource_id: resource_id.to_string(),
            token,
        })
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        let MemoryLockManagerConfig {
            local_identifier,
            ttl,
        } = MemoryLockManagerConfig::default();

        Self {
            table: Arc::new(Table::default()),
            local_identifier,
            ttl,
        }
    }
}

/// Releases the lock when dropped, unless it already expired and was taken
/// by someone else.
#[derive(Debug)]
pub struct MemoryLockGuard {
    table: Arc<Table>,
    resource_id: String,
    token: u64,
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();

        if held
            .get(&self.resource_id)
            .is_some_and(|holder| holder.token == self.token)
        {
            held.remove(&self.resource_id);
            drop(held);

            debug!(key = %self.resource_id, "lock released");
            self.table.released.notify_waiters();
        }
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    type Error = Error;
    type Guard = MemoryLockGuard;

    async fn check(&self, resource_id: &str) -> Result<LockStatus, Self::Error> {
        let now = Instant::now();
        let held = self.table.held.lock();

        Ok(match held.get(resource_id).filter(|h| h.expires_at > now) {
            None => LockStatus::Free,
            Some(holder) if holder.identifier == self.local_identifier => LockStatus::HeldBySelf,
            Some(holder) => LockStatus::HeldByOther(holder.identifier.clone()),
        })
    }

    #[instrument(skip(self), fields(local_id = %self.local_identifier))]
    async fn lock(&self, resource_id: &str) -> Result<Self::Guard, Self::Error> {
        loop {
            let released = self.table.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.try_acquire(resource_id) {
                Ok(guard) => return Ok(guard),
                Err(expires_at) => {
                    debug!(key = %resource_id, "lock held, waiting");
                    tokio::select! {
                        () = &mut released => {}
                        () = tokio::time::sleep_until(expires_at) => {}
                    }
                }
            }
        }
    }

    async fn try_lock(&self, resource_id: &str) -> Result<Option<Self::Guard>, Self::Error> {
        Ok(self.try_acquire(resource_id).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    fn manager() -> MemoryLockManager {
        MemoryLockManager::new(MemoryLockManagerConfig {
            local_identifier: "holder-1".to_string(),
            ttl: Duration::from_secs(60),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_lock_and_drop_release() {
        let manager = manager();

        {
            let _guard = manager.lock("resource").await.unwrap();
            assert_eq!(
                manager.check("resource").await.unwrap(),
                LockStatus::HeldBySelf
            );
        }

        assert_eq!(manager.check("resource").await.unwrap(), LockStatus::Free);
    }

    #[tokio::test]
    async fn test_try_lock_conflict() {
        let manager1 = manager();
        let manager2 = manager1.sibling("holder-2");

        let _guard = manager1.try_lock("resource").await.unwrap().unwrap();

        assert!(manager2.try_lock("resource").await.unwrap().is_none());
        assert_eq!(
            manager2.check("resource").await.unwrap(),
            LockStatus::HeldByOther("holder-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let manager1 = manager();
        let manager2 = manager1.sibling("holder-2");

        let guard = manager1.lock("resource").await.unwrap();

        let waiter = tokio::spawn(async move { manager2.lock("resource").await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_within_gives_up() {
        let manager1 = manager();
        let manager2 = manager1.sibling("holder-2");

        let _guard = manager1.lock("resource").await.unwrap();

        let acquired = manager2
            .lock_within("resource", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(acquired.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_can_be_taken() {
        let manager1 = manager();
        let manager2 = manager1.sibling("holder-2");

        let stale = manager1.lock("resource").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let _fresh = manager2.try_lock("resource").await.unwrap().unwrap();

        // the stale guard must not release the new holder's lock
        drop(stale);
        assert_eq!(
            manager1.check("resource").await.unwrap(),
            LockStatus::HeldByOther("holder-2".to_string())
        );
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let result = MemoryLockManager::new(MemoryLockManagerConfig {
            ttl: Duration::ZERO,
            ..MemoryLockManagerConfig::default()
        });

        assert_matches!(result, Err(Error::ZeroTtl));
    }
}
