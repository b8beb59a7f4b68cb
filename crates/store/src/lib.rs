//! Abstract interface for the shared key-value store used for event status
//! tracking and handler caches.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for store errors
pub trait StoreError: Debug + Error + Send + Sync + 'static {}

/// Field/value pairs of a hash.
pub type Hash = HashMap<String, String>;

/// The kind of value stored under a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    /// A field/value hash.
    Hash,

    /// A plain value.
    String,

    /// No such key.
    None,

    /// Any other server-side type.
    Other,
}

/// One page of a cursor scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next page. Zero once the scan is complete.
    pub cursor: u64,

    /// Keys in this page. May be empty even when the scan is not complete.
    pub keys: Vec<String>,
}

/// A trait representing a key-value store with plain values, hashes, expiry
/// and cursor scans.
#[async_trait]
pub trait Store
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the store.
    type Error: StoreError;

    /// Deletes a key of any type.
    async fn del(&self, key: &str) -> Result<(), Self::Error>;

    /// Sets the remaining lifetime of an existing key. Returns `false` if
    /// there is no such key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Self::Error>;

    /// Retrieves a plain value.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Self::Error>;

    /// Retrieves every field of a hash. Missing keys yield an empty hash.
    async fn hgetall(&self, key: &str) -> Result<Hash, Self::Error>;

    /// Retrieves several hashes in one round trip, in the order given.
    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<Hash>, Self::Error>;

    /// Sets fields on a hash, creating it if needed. Other fields and the
    /// key's expiry are kept.
    async fn hset(&self, key: &str, fields: Hash) -> Result<(), Self::Error>;

    /// Reports the type stored under a key.
    async fn key_type(&self, key: &str) -> Result<KeyType, Self::Error>;

    /// Stores a plain value, replacing any previous value and expiry.
    async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), Self::Error>;

    /// Returns one page of keys matching a glob `pattern` (`*` and `?`).
    /// Start with cursor zero; the scan is complete when the returned cursor
    /// is zero again. `count` is a hint for the page size.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, Self::Error>;
}
