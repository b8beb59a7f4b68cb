//! Abstract interface for managing system-global distributed locks.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

/// Marker trait for `LockManager` errors
pub trait LockManagerError: Debug + Error + Send + Sync + 'static {}

/// Represents the current status of a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is free.
    Free,

    /// The lock is held by another instance, identified by the String.
    HeldByOther(String),

    /// The lock is held by the current instance/manager.
    HeldBySelf,
}

/// A trait representing a distributed lock manager with asynchronous operations.
/// Locks are acquired with a TTL and are represented by a guard type that
/// automatically releases the lock when dropped.
#[async_trait]
pub trait LockManager
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for lock operations.
    type Error: LockManagerError;

    /// The guard type that releases the lock on drop.
    type Guard: Send + Sync + 'static;

    /// Checks the status of a lock.
    ///
    /// # Arguments
    /// * `resource_id`: The unique identifier for the resource.
    async fn check(&self, resource_id: &str) -> Result<LockStatus, Self::Error>;

    /// Attempts to acquire a lock, waiting indefinitely until it becomes available.
    ///
    /// On successful acquisition, returns a lock guard. The lock is automatically
    /// released when the guard is dropped.
    ///
    /// # Arguments
    /// * `resource_id`: A unique identifier for the resource to be locked.
    async fn lock(&self, resource_id: &str) -> Result<Self::Guard, Self::Error>;

    /// Attempts to acquire a lock, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` if the lock was still held by another when the wait
    /// ran out.
    async fn lock_within(
        &self,
        resource_id: &str,
        wait: Duration,
    ) -> Result<Option<Self::Guard>, Self::Error> {
        match tokio::time::timeout(wait, self.lock(resource_id)).await {
            Ok(acquired) => acquired.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Attempts to acquire a lock without waiting.
    ///
    /// If the lock is acquired successfully, returns `Ok(Some(Guard))`.
    /// If the lock is currently held by another, returns `Ok(None)`.
    /// If an error occurs during the attempt, returns `Err(Self::Error)`.
    ///
    /// # Arguments
    /// * `resource_id`: A unique identifier for the resource to be locked.
    async fn try_lock(&self, resource_id: &str) -> Result<Option<Self::Guard>, Self::Error>;
}
