//! Implementation of distributed locks on a shared Redis server.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod guard;

pub use error::Error;
pub use guard::RedisLockGuard;

use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use relay_locks::{LockManager, LockStatus};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Configuration for the `RedisLockManager`.
#[derive(Clone, Debug)]
pub struct RedisLockManagerConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`.
    pub url: String,

    /// A unique identifier for this lock manager instance/client.
    pub local_identifier: String,

    /// TTL for locks. Prevents locks from being held indefinitely if the guard is never dropped.
    pub ttl: Duration,
}

/// A distributed lock manager implemented with `SET NX PX` and a
/// compare-and-delete release.
#[derive(Clone)]
pub struct RedisLockManager {
    connection: ConnectionManager,
    local_identifier: String,
    ttl_millis: u64,
}

impl RedisLockManager {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroTtl`] for a TTL under one millisecond and
    /// [`Error::Redis`] if the server cannot be reached.
    pub async fn connect(
        RedisLockManagerConfig {
            url,
            local_identifier,
            ttl,
        }: RedisLockManagerConfig,
    ) -> Result<Self, Error> {
        let client = redis::Client::open(url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        info!(%url, %local_identifier, "connected to redis lock manager");

        Self::from_connection(connection, local_identifier, ttl)
    }

    /// Wraps an existing connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroTtl`] for a TTL under one millisecond.
    pub fn from_connection(
        connection: ConnectionManager,
        local_identifier: String,
        ttl: Duration,
    ) -> Result<Self, Error> {
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if ttl_millis == 0 {
            return Err(Error::ZeroTtl);
        }

        Ok(Self {
            connection,
            local_identifier,
            ttl_millis,
        })
    }

    fn token(&self) -> String {
        format!("{}:{}", self.local_identifier, Uuid::new_v4().simple())
    }

    /// Retries `try_lock` with growing, jittered pauses. Gives up with
    /// `Ok(None)` once the next pause would run past `deadline`.
    async fn acquire(
        &self,
        resource_id: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<RedisLockGuard>, Error> {
        let mut poll_interval = Duration::from_millis(100);

        loop {
            match self.try_lock(resource_id).await {
                Ok(Some(guard)) => return Ok(Some(guard)),
                Ok(None) => {
                    let Some(pause) = next_pause(poll_interval, Instant::now(), deadline) else {
                        debug!(key = %resource_id, "lock still held at deadline");
                        return Ok(None);
                    };

                    debug!(key = %resource_id, ?pause, "lock held by another, waiting");
                    tokio::time::sleep(pause).await;

                    poll_interval = std::cmp::min(
                        poll_interval.mul_f64(fastrand::f64().mul_add(0.1, 1.5)),
                        MAX_POLL_INTERVAL,
                    );
                }
                Err(e) => {
                    error!(key = %resource_id, error = ?e, "error during lock attempt, aborting");
                    return Err(e);
                }
            }
        }
    }
}

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause before the next attempt, clipped to the deadline. `None` once the
/// deadline has passed.
fn next_pause(poll_interval: Duration, now: Instant, deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(poll_interval),
        Some(deadline) if deadline <= now => None,
        Some(deadline) => Some(poll_interval.min(deadline - now)),
    }
}

impl Debug for RedisLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLockManager")
            .field("local_identifier", &self.local_identifier)
            .field("ttl_millis", &self.ttl_millis)
            .finish_non_exhaustive()
    }
}

/// The identifier part of a `{identifier}:{nonce}` token.
fn holder_of(token: &str) -> &str {
    token.rsplit_once(':').map_or(token, |(holder, _)| holder)
}

#[async_trait]
impl LockManager for RedisLockManager {
    type Error = Error;
    type Guard = RedisLockGuard;

    #[instrument(skip(self))]
    async fn check(&self, resource_id: &str) -> Result<LockStatus, Self::Error> {
        let mut connection = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(resource_id)
            .query_async(&mut connection)
            .await?;

        Ok(match value {
            None => LockStatus::Free,
            Some(token) if holder_of(&token) == self.local_identifier => LockStatus::HeldBySelf,
            Some(token) => LockStatus::HeldByOther(holder_of(&token).to_string()),
        })
    }

    #[instrument(skip(self), fields(local_id = %self.local_identifier))]
    async fn lock(&self, resource_id: &str) -> Result<Self::Guard, Self::Error> {
        loop {
            if let Some(guard) = self.acquire(resource_id, None).await? {
                return Ok(guard);
            }
        }
    }

    /// Polls until `wait` runs out. An attempt is never abandoned mid-flight,
    /// so a `SET` that lands always comes back as a guard.
    #[instrument(skip(self), fields(local_id = %self.local_identifier))]
    async fn lock_within(
        &self,
        resource_id: &str,
        wait: Duration,
    ) -> Result<Option<Self::Guard>, Self::Error> {
        self.acquire(resource_id, Some(Instant::now() + wait)).await
    }

    #[instrument(skip(self), fields(local_id = %self.local_identifier))]
    async fn try_lock(&self, resource_id: &str) -> Result<Option<Self::Guard>, Self::Error> {
        let token = self.token();
        let mut connection = self.connection.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(resource_id)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_millis)
            .query_async(&mut connection)
            .await?;

        if acquired.is_none() {
            return Ok(None);
        }

        debug!(key = %resource_id, "lock acquired");
        Ok(Some(RedisLockGuard::new(
            connection,
            resource_id.to_string(),
            token,
        )))
    }
}
