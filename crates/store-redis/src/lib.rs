//! Redis implementation of key-value storage.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use relay_store::{Hash, KeyType, ScanPage, Store};
use tracing::{info, instrument};

/// Configuration for [`RedisStore`].
#[derive(Clone, Debug)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`.
    pub url: String,
}

/// Key-value store on a shared Redis server. Clones share one
/// auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    url: String,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redis`] if the URL is invalid or the server cannot
    /// be reached.
    pub async fn connect(RedisStoreConfig { url }: RedisStoreConfig) -> Result<Self, Error> {
        let client = redis::Client::open(url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        info!(%url, "connected to redis store");

        Ok(Self { connection, url })
    }

    /// Wraps an existing connection.
    #[must_use]
    pub fn from_connection(connection: ConnectionManager, url: impl Into<String>) -> Self {
        Self {
            connection,
            url: url.into(),
        }
    }
}

impl Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Store for RedisStore {
    type Error = Error;

    async fn del(&self, key: &str) -> Result<(), Self::Error> {
        let mut connection = self.connection.clone();
        let _: i64 = connection.del(key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Self::Error> {
        let mut connection = self.connection.clone();
        let updated: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut connection)
            .await?;
        Ok(updated)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = connection.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn hgetall(&self, key: &str) -> Result<Hash, Self::Error> {
        let mut connection = self.connection.clone();
        let hash: Hash = connection.hgetall(key).await?;
        Ok(hash)
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<Hash>, Self::Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipeline = redis::pipe();
        for key in keys {
            pipeline.hgetall(key);
        }

        let mut connection = self.connection.clone();
        let hashes: Vec<Hash> = pipeline.query_async(&mut connection).await?;
        Ok(hashes)
    }

    async fn hset(&self, key: &str, fields: Hash) -> Result<(), Self::Error> {
        if fields.is_empty() {
            return Ok(());
        }

        let fields: Vec<(String, String)> = fields.into_iter().collect();
        let mut connection = self.connection.clone();
        let () = connection.hset_multiple(key, &fields).await?;
        Ok(())
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, Self::Error> {
        let mut connection = self.connection.clone();
        let kind: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(&mut connection)
            .await?;

        Ok(match kind.as_str() {
            "hash" => KeyType::Hash,
            "string" => KeyType::String,
            "none" => KeyType::None,
            _ => KeyType::Other,
        })
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), Self::Error> {
        let mut command = redis::cmd("SET");
        command.arg(key).arg(value.as_ref());
        if let Some(ttl) = ttl {
            command.arg("PX").arg(millis(ttl));
        }

        let mut connection = self.connection.clone();
        let () = command.query_async(&mut connection).await?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, Self::Error> {
        let mut connection = self.connection.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut connection)
            .await?;

        Ok(ScanPage { cursor, keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use uuid::Uuid;

    async fn store() -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RedisStore::connect(RedisStoreConfig { url }).await.unwrap()
    }

    fn unique(prefix: &str) -> String {
        format!("relay-test:{prefix}:{}", Uuid::new_v4().simple())
    }

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_hash_round_trip_and_type() {
        let store = store().await;
        let key = unique("hash");

        store
            .hset(&key, HashMap::from([("status".to_string(), "assigned".to_string())]))
            .await
            .unwrap();
        assert!(store.expire(&key, Duration::from_secs(30)).await.unwrap());

        assert_eq!(store.key_type(&key).await.unwrap(), KeyType::Hash);
        assert_eq!(store.hgetall(&key).await.unwrap()["status"], "assigned");

        let many = store
            .hgetall_many(&[key.clone(), unique("missing")])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);
        assert!(many[1].is_empty());

        store.del(&key).await.unwrap();
        assert_eq!(store.key_type(&key).await.unwrap(), KeyType::None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_scan_finds_prefixed_keys() {
        let store = store().await;
        let prefix = unique("scan");

        for i in 0..5 {
            store
                .put(&format!("{prefix}:{i}"), Bytes::from_static(b"v"), Some(Duration::from_secs(30)))
                .await
                .unwrap();
        }

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let page = store.scan(cursor, &format!("{prefix}:*"), 100).await.unwrap();
            found.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(found.len(), 5);
    }
}
