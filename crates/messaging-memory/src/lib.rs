//! In-memory (single process) broker for tests and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Consumers pull from a named queue.
pub mod consumer;

/// Producers push onto named queues.
pub mod producer;

pub use consumer::{MemoryConsumer, MemoryReceipt};
pub use producer::MemoryProducer;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Queue {
    messages: Mutex<VecDeque<Bytes>>,
    arrived: Notify,
    acked: AtomicUsize,
    redelivered: AtomicUsize,
}

impl Queue {
    fn push_back(&self, message: Bytes) {
        self.messages.lock().push_back(message);
        self.arrived.notify_waiters();
    }

    fn push_front(&self, message: Bytes) {
        self.messages.lock().push_front(message);
        self.arrived.notify_waiters();
    }

    fn pop(&self) -> Option<Bytes> {
        self.messages.lock().pop_front()
    }
}

/// A set of named queues shared by the producers and consumers created from
/// it. Clones share the same queues.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, Arc<Queue>>>>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A producer that can send to any queue on this broker.
    #[must_use]
    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer::new(self.clone())
    }

    /// A consumer of `queue`. Each call returns an independent connection.
    #[must_use]
    pub fn consumer(&self, queue: impl Into<String>) -> MemoryConsumer {
        let name = queue.into();
        let queue = self.queue(&name);
        MemoryConsumer::new(name, queue)
    }

    /// Messages waiting in `queue`, excluding deliveries not yet settled.
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.queue(queue).messages.lock().len()
    }

    /// Deliveries settled with an acknowledgment.
    #[must_use]
    pub fn acked(&self, queue: &str) -> usize {
        self.queue(queue).acked.load(Ordering::SeqCst)
    }

    /// Deliveries returned to the queue.
    #[must_use]
    pub fn redelivered(&self, queue: &str) -> usize {
        self.queue(queue).redelivered.load(Ordering::SeqCst)
    }

    fn queue(&self, name: &str) -> Arc<Queue> {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::StreamExt;
    use relay_messaging::{Consumer, Disposition, Producer, SendOptions};
    use tokio::time::timeout;

    async fn started(broker: &MemoryBroker, queue: &str) -> MemoryConsumer {
        let consumer = broker.consumer(queue);
        consumer.start().await.unwrap();
        consumer
    }

    async fn send(broker: &MemoryBroker, queue: &str, body: &'static str) {
        broker
            .producer()
            .send(queue, Bytes::from_static(body.as_bytes()), SendOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_receive_ack() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        send(&broker, "events", "one").await;

        let delivery = consumer.receive().await.unwrap().unwrap();
        assert_eq!(delivery.payload, Bytes::from_static(b"one"));

        consumer
            .settle(delivery.receipt, Disposition::Ack)
            .await
            .unwrap();

        assert_eq!(broker.acked("events"), 1);
        assert_eq!(broker.pending("events"), 0);
    }

    #[tokio::test]
    async fn test_redeliver_returns_message_to_head() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        send(&broker, "events", "one").await;
        send(&broker, "events", "two").await;

        let first = consumer.receive().await.unwrap().unwrap();
        consumer
            .settle(first.receipt, Disposition::Redeliver)
            .await
            .unwrap();

        let again = consumer.receive().await.unwrap().unwrap();
        assert_eq!(again.payload, Bytes::from_static(b"one"));
        assert_eq!(broker.redelivered("events"), 1);
    }

    #[tokio::test]
    async fn test_receive_waits_for_send() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        let receiver = tokio::spawn(async move { consumer.receive().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        send(&broker, "events", "late").await;

        let delivery = timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn test_restarted_consumer_delivers_again() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        consumer.stop().await.unwrap();
        assert!(consumer.receive().await.unwrap().is_none());

        consumer.start().await.unwrap();
        send(&broker, "events", "after-restart").await;

        let delivery = timeout(Duration::from_secs(1), consumer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, Bytes::from_static(b"after-restart"));
    }

    #[tokio::test]
    async fn test_cancel_suppresses_next_ack_only() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        send(&broker, "events", "one").await;

        consumer.cancel().await.unwrap();
        let delivery = consumer.receive().await.unwrap().unwrap();
        consumer
            .settle(delivery.receipt, Disposition::Ack)
            .await
            .unwrap();

        assert_eq!(broker.acked("events"), 0);
        assert_eq!(broker.pending("events"), 1);

        let delivery = consumer.receive().await.unwrap().unwrap();
        consumer
            .settle(delivery.receipt, Disposition::Ack)
            .await
            .unwrap();

        assert_eq!(broker.acked("events"), 1);
    }

    #[tokio::test]
    async fn test_double_pause_reaches_broker_once() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        assert!(consumer.pause().await.unwrap());
        assert!(!consumer.pause().await.unwrap());
        assert_eq!(consumer.broker_pauses(), 1);

        send(&broker, "events", "one").await;
        let pending = timeout(Duration::from_millis(50), consumer.receive()).await;
        assert!(pending.is_err(), "paused consumer must not deliver");

        assert!(consumer.resume().await.unwrap());
        assert!(!consumer.resume().await.unwrap());
        assert_eq!(consumer.broker_resumes(), 1);

        let delivery = timeout(Duration::from_secs(1), consumer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_redeliver_and_pause_pauses_consumer() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        send(&broker, "events", "one").await;
        let delivery = consumer.receive().await.unwrap().unwrap();
        consumer
            .settle(delivery.receipt, Disposition::RedeliverAndPause)
            .await
            .unwrap();

        assert!(consumer.is_paused());
        assert_eq!(broker.pending("events"), 1);
    }

    #[tokio::test]
    async fn test_stop_ends_stream_and_returns_in_flight() {
        let broker = MemoryBroker::new();
        let consumer = started(&broker, "events").await;

        send(&broker, "events", "one").await;
        let _unsettled = consumer.receive().await.unwrap().unwrap();

        consumer.stop().await.unwrap();

        assert_eq!(broker.pending("events"), 1);
        assert!(consumer.consume().next().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_before_start_fails() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("events");

        assert_matches!(consumer.receive().await, Err(consumer::Error::NotStarted));
    }

    #[tokio::test]
    async fn test_workers_share_queue() {
        let broker = MemoryBroker::new();
        let first = started(&broker, "events").await;
        let second = started(&broker, "events").await;

        send(&broker, "events", "one").await;
        send(&broker, "events", "two").await;

        let a = first.receive().await.unwrap().unwrap();
        let b = second.receive().await.unwrap().unwrap();

        assert_ne!(a.payload, b.payload);
    }
}
