//! Partitioned-log backend for the messaging traits, built on librdkafka.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Group consumer with manual offset commits.
pub mod consumer;

/// Producer that keys records by ordering group.
pub mod producer;

pub use consumer::{KafkaConsumer, KafkaConsumerOptions, KafkaReceipt};
pub use producer::{KafkaProducer, KafkaProducerOptions};

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use bytes::Bytes;
    use relay_messaging::{Consumer, Disposition, Producer, SendOptions};
    use uuid::Uuid;

    fn bootstrap_servers() -> String {
        std::env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running Kafka broker"]
    async fn test_unacked_message_is_redelivered() {
        let topic = format!("relay-test-{}", Uuid::new_v4().simple());

        let producer = KafkaProducer::new(KafkaProducerOptions {
            bootstrap_servers: bootstrap_servers(),
            ..KafkaProducerOptions::default()
        })
        .unwrap();
        producer.start().await.unwrap();
        producer
            .send(&topic, Bytes::from_static(b"hello"), SendOptions::group("g"))
            .await
            .unwrap();

        let consumer = KafkaConsumer::new(KafkaConsumerOptions {
            bootstrap_servers: bootstrap_servers(),
            topic: topic.clone(),
            group_id: format!("relay-test-{}", Uuid::new_v4().simple()),
            ..KafkaConsumerOptions::default()
        })
        .unwrap();
        consumer.start().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(30), consumer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"hello"));
        consumer
            .settle(first.receipt.clone(), Disposition::Redeliver)
            .await
            .unwrap();

        let second = tokio::time::timeout(Duration::from_secs(30), consumer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.receipt.offset, first.receipt.offset);
        consumer
            .settle(second.receipt, Disposition::Ack)
            .await
            .unwrap();

        consumer.stop().await.unwrap();
        producer.stop().await.unwrap();
    }
}
