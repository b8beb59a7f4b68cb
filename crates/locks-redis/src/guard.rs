use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

// delete only if the value is still our token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Releases the lock when dropped. Release runs on the current tokio runtime;
/// without one the lock is left to its TTL.
pub struct RedisLockGuard {
    connection: ConnectionManager,
    key: String,
    token: String,
}

impl RedisLockGuard {
    pub(crate) const fn new(connection: ConnectionManager, key: String, token: String) -> Self {
        Self {
            connection,
            key,
            token,
        }
    }
}

impl std::fmt::Debug for RedisLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockGuard")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for RedisLockGuard {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "no runtime to release lock; leaving it to expire");
            return;
        };

        let mut connection = self.connection.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        runtime.spawn(async move {
            let released: redis::RedisResult<i64> = Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(&token)
                .invoke_async(&mut connection)
                .await;

            match released {
                Ok(1) => debug!(%key, "lock released"),
                Ok(_) => warn!(%key, "lock expired before release"),
                Err(error) => warn!(%key, %error, "failed to release lock; leaving it to expire"),
            }
        });
    }
}
