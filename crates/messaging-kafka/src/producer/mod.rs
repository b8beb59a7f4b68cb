mod error;

pub use error::Error;

use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use relay_messaging::{Producer, SendOptions};
use tracing::{debug, info, instrument};

/// Options for [`KafkaProducer`].
#[derive(Clone, Debug)]
pub struct KafkaProducerOptions {
    /// Comma-separated broker list.
    pub bootstrap_servers: String,

    /// How long a send may wait for queue space and delivery.
    pub send_timeout: Duration,

    /// How long `stop` waits for in-flight records.
    pub flush_timeout: Duration,
}

impl Default for KafkaProducerOptions {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            send_timeout: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(10),
        }
    }
}

/// Kafka producer. Clones share one librdkafka client.
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    bootstrap_servers: String,
    send_timeout: Duration,
    flush_timeout: Duration,
}

impl KafkaProducer {
    /// Creates the producer. librdkafka connects lazily.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Create`] if the client configuration is rejected.
    pub fn new(
        KafkaProducerOptions {
            bootstrap_servers,
            send_timeout,
            flush_timeout,
        }: KafkaProducerOptions,
    ) -> Result<Self, Error> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .create()
            .map_err(Error::Create)?;

        Ok(Self {
            producer,
            bootstrap_servers,
            send_timeout,
            flush_timeout,
        })
    }
}

impl Debug for KafkaProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    type Error = Error;

    async fn start(&self) -> Result<(), Self::Error> {
        info!(bootstrap_servers = %self.bootstrap_servers, "kafka producer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        self.producer.flush(self.flush_timeout).map_err(Error::Flush)?;
        info!(bootstrap_servers = %self.bootstrap_servers, "kafka producer stopped");
        Ok(())
    }

    #[instrument(skip(self, message), fields(bytes = message.len()))]
    async fn send(
        &self,
        destination: &str,
        message: Bytes,
        options: SendOptions,
    ) -> Result<(), Self::Error> {
        let mut record: FutureRecord<'_, str, [u8]> =
            FutureRecord::to(destination).payload(message.as_ref());

        if let Some(key) = options.partition_key() {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(source, _)| Error::Send {
                topic: destination.to_string(),
                source,
            })?;

        debug!(topic = destination, partition, offset, "record delivered");
        Ok(())
    }
}
