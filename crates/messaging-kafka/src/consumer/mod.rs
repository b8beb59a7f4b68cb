mod error;

pub use error::Error;

use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::{ClientConfig, Message as _, Offset, TopicPartitionList};
use relay_messaging::{AckGate, Consumer, Delivery, Disposition, PauseSwitch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Options for [`KafkaConsumer`].
#[derive(Clone, Debug)]
pub struct KafkaConsumerOptions {
    /// Comma-separated broker list.
    pub bootstrap_servers: String,

    /// Topic to subscribe to.
    pub topic: String,

    /// Consumer group.
    pub group_id: String,

    /// Where a group with no committed offset starts.
    pub auto_offset_reset: String,

    /// Timeout for seeking a partition back on redelivery.
    pub seek_timeout: Duration,
}

impl Default for KafkaConsumerOptions {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: String::new(),
            group_id: "default-group".to_string(),
            auto_offset_reset: "earliest".to_string(),
            seek_timeout: Duration::from_secs(5),
        }
    }
}

/// Position of a delivered record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KafkaReceipt {
    /// Topic.
    pub topic: String,

    /// Partition.
    pub partition: i32,

    /// Offset of the record itself. The committed offset is one past it.
    pub offset: i64,
}

/// Group consumer of one topic. Auto-commit is off; an offset is committed
/// only when its delivery is acknowledged, and a redelivery seeks the
/// partition back to the record.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
    seek_timeout: Duration,
    switch: PauseSwitch,
    gate: AckGate,
    shutdown: Mutex<CancellationToken>,
}

impl KafkaConsumer {
    /// Creates the consumer. Nothing is fetched until [`Consumer::start`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Create`] if the client configuration is rejected.
    pub fn new(
        KafkaConsumerOptions {
            bootstrap_servers,
            topic,
            group_id,
            auto_offset_reset,
            seek_timeout,
        }: KafkaConsumerOptions,
    ) -> Result<Self, Error> {
        let consumer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .create()
            .map_err(Error::Create)?;

        Ok(Self {
            consumer,
            topic,
            group_id,
            seek_timeout,
            switch: PauseSwitch::new(),
            gate: AckGate::new(),
            shutdown: Mutex::new(CancellationToken::new()),
        })
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.lock().clone()
    }

    /// A stopped consumer can be started again.
    fn reset_shutdown(&self) {
        let mut shutdown = self.shutdown.lock();
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
    }

    fn rewind(&self, receipt: &KafkaReceipt) -> Result<(), Error> {
        self.consumer
            .seek(
                &receipt.topic,
                receipt.partition,
                Offset::Offset(receipt.offset),
                self.seek_timeout,
            )
            .map_err(|source| Error::Seek {
                topic: receipt.topic.clone(),
                partition: receipt.partition,
                offset: receipt.offset,
                source,
            })
    }

    fn commit(&self, receipt: &KafkaReceipt) -> Result<(), Error> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &receipt.topic,
                receipt.partition,
                Offset::Offset(receipt.offset + 1),
            )
            .map_err(Error::Commit)?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(Error::Commit)
    }
}

impl Debug for KafkaConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaConsumer")
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("paused", &self.switch.is_paused())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    type Error = Error;
    type Receipt = KafkaReceipt;

    async fn start(&self) -> Result<(), Self::Error> {
        self.reset_shutdown();
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(Error::Subscribe)?;

        info!(topic = %self.topic, group_id = %self.group_id, "kafka consumer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        self.shutdown_token().cancel();
        self.consumer.unsubscribe();

        info!(topic = %self.topic, group_id = %self.group_id, "kafka consumer stopped");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery<Self::Receipt>>, Self::Error> {
        let shutdown = self.shutdown_token();

        loop {
            tokio::select! {
                () = self.switch.wait_running() => {}
                () = shutdown.cancelled() => return Ok(None),
            }

            let (payload, receipt) = {
                let message = tokio::select! {
                    received = self.consumer.recv() => received.map_err(Error::Receive)?,
                    () = shutdown.cancelled() => return Ok(None),
                };

                let receipt = KafkaReceipt {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                };
                let payload = message
                    .payload()
                    .map(Bytes::copy_from_slice)
                    .unwrap_or_default();

                (payload, receipt)
            };

            // fetched after the assignment was paused
            if self.switch.is_paused() {
                self.rewind(&receipt)?;
                continue;
            }

            debug!(
                topic = %receipt.topic,
                partition = receipt.partition,
                offset = receipt.offset,
                "delivering record"
            );
            return Ok(Some(Delivery::new(payload, receipt)));
        }
    }

    #[instrument(skip(self), fields(topic = %receipt.topic, partition = receipt.partition, offset = receipt.offset))]
    async fn settle(
        &self,
        receipt: Self::Receipt,
        disposition: Disposition,
    ) -> Result<(), Self::Error> {
        let disposition = self.gate.apply(disposition);

        if disposition.acknowledges() {
            self.commit(&receipt)?;
            debug!("offset committed");
        } else {
            self.rewind(&receipt)?;
            debug!("partition rewound for redelivery");
        }

        if disposition.pauses() {
            self.pause().await?;
        }

        Ok(())
    }

    async fn pause(&self) -> Result<bool, Self::Error> {
        if !self.switch.pause() {
            return Ok(false);
        }

        let paused = self
            .consumer
            .assignment()
            .and_then(|assignment| self.consumer.pause(&assignment));

        if let Err(error) = paused {
            self.switch.resume();
            return Err(Error::Flow(error));
        }

        info!(topic = %self.topic, "kafka consumer paused");
        Ok(true)
    }

    async fn resume(&self) -> Result<bool, Self::Error> {
        if !self.switch.resume() {
            return Ok(false);
        }

        let resumed = self
            .consumer
            .assignment()
            .and_then(|assignment| self.consumer.resume(&assignment));

        if let Err(error) = resumed {
            warn!(topic = %self.topic, %error, "failed to resume partitions");
            self.switch.pause();
            return Err(Error::Flow(error));
        }

        info!(topic = %self.topic, "kafka consumer resumed");
        Ok(true)
    }

    async fn cancel(&self) -> Result<(), Self::Error> {
        self.gate.arm();
        debug!(topic = %self.topic, "next commit suppressed");
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.switch.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer() -> KafkaConsumer {
        KafkaConsumer::new(KafkaConsumerOptions {
            topic: "relay-test".to_string(),
            ..KafkaConsumerOptions::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_restart_gets_fresh_shutdown() {
        let consumer = consumer();

        consumer.stop().await.unwrap();
        assert!(consumer.shutdown_token().is_cancelled());

        consumer.reset_shutdown();
        assert!(!consumer.shutdown_token().is_cancelled());
    }
}
