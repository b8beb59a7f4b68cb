use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Marker trait for producer errors
pub trait ProducerError: Debug + Error + Send + Sync + 'static {}

/// Transport-specific options for a single send.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct SendOptions {
    /// Ordering group. Queues with FIFO semantics keep a group in order;
    /// partitioned logs use it as the record key when no key is set.
    pub group_id: Option<String>,

    /// Explicit record key for partitioned logs.
    pub key: Option<String>,
}

impl SendOptions {
    /// Options with an ordering group.
    #[must_use]
    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            key: None,
        }
    }

    /// The key a partitioned log should use: the explicit key, else the group.
    #[must_use]
    pub fn partition_key(&self) -> Option<&str> {
        self.key.as_deref().or(self.group_id.as_deref())
    }
}

/// A trait representing a producer bound to one broker or queue service.
#[async_trait]
pub trait Producer
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the producer.
    type Error: ProducerError;

    /// Prepares the producer for sending.
    async fn start(&self) -> Result<(), Self::Error>;

    /// Flushes pending sends and releases the connection.
    async fn stop(&self) -> Result<(), Self::Error>;

    /// Sends one message to `destination` (a topic or queue URL).
    async fn send(
        &self,
        destination: &str,
        message: Bytes,
        options: SendOptions,
    ) -> Result<(), Self::Error>;
}
