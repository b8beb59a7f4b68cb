use crate::delivery::{Delivery, Disposition};

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

/// Marker trait for consumer errors
pub trait ConsumerError: Debug + Error + Send + Sync + 'static {}

/// A trait representing one connection that receives messages from a topic or
/// queue.
///
/// A consumer is owned by exactly one worker. Deliveries are handed out one at
/// a time and nothing is committed until the worker calls
/// [`Consumer::settle`] with [`Disposition::Ack`].
#[async_trait]
pub trait Consumer
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the consumer.
    type Error: ConsumerError;

    /// Backend handle identifying a delivery for settlement.
    type Receipt: Debug + Send + Sync + 'static;

    /// Connects and subscribes.
    async fn start(&self) -> Result<(), Self::Error>;

    /// Unsubscribes and closes the connection. Pending `receive` calls return
    /// `Ok(None)`.
    async fn stop(&self) -> Result<(), Self::Error>;

    /// Waits for the next delivery. Blocks while paused. Returns `Ok(None)`
    /// once the consumer has been stopped.
    async fn receive(&self) -> Result<Option<Delivery<Self::Receipt>>, Self::Error>;

    /// Stream of deliveries built on [`Consumer::receive`]. Ends when the
    /// consumer stops.
    fn consume(&self) -> BoxStream<'_, Result<Delivery<Self::Receipt>, Self::Error>>
    where
        Self: Sized,
    {
        stream::unfold(self, |consumer| async move {
            match consumer.receive().await {
                Ok(Some(delivery)) => Some((Ok(delivery), consumer)),
                Ok(None) => None,
                Err(error) => Some((Err(error), consumer)),
            }
        })
        .boxed()
    }

    /// Commits the delivery or leaves it for redelivery. A pending
    /// [`Consumer::cancel`] turns `Ack` into a redelivery once.
    /// `RedeliverAndPause` also pauses the consumer.
    async fn settle(
        &self,
        receipt: Self::Receipt,
        disposition: Disposition,
    ) -> Result<(), Self::Error>;

    /// Stops fetching. Returns `false` if already paused.
    async fn pause(&self) -> Result<bool, Self::Error>;

    /// Restarts fetching. Returns `false` if not paused.
    async fn resume(&self) -> Result<bool, Self::Error>;

    /// Suppresses the next acknowledgment and releases anything fetched but
    /// not yet handed out.
    async fn cancel(&self) -> Result<(), Self::Error>;

    /// Whether the consumer is paused.
    fn is_paused(&self) -> bool;
}
