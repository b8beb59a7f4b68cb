mod error;

pub use error::Error;

use crate::{SdkFailure, SqsClientOptions, SqsConnector};

use std::collections::VecDeque;

use async_trait::async_trait;
use aws_sdk_sqs::types::Message;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_messaging::{AckGate, Consumer, Delivery, Disposition, PauseSwitch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

// SQS rejects longer long polls
const MAX_WAIT_TIME_SECONDS: i32 = 20;

/// Options for [`SqsConsumer`].
#[derive(Clone, Debug)]
pub struct SqsConsumerOptions {
    /// Client settings.
    pub client: SqsClientOptions,

    /// Queue to poll.
    pub queue_url: String,

    /// Messages fetched per poll (1 to 10).
    pub max_number_of_messages: i32,

    /// Long poll duration in seconds.
    pub wait_time_seconds: i32,
}

impl Default for SqsConsumerOptions {
    fn default() -> Self {
        Self {
            client: SqsClientOptions::default(),
            queue_url: String::new(),
            max_number_of_messages: 10,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
        }
    }
}

/// Handle for deleting a received message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqsReceipt {
    /// Receipt handle from the receive call.
    pub receipt_handle: String,

    /// Service-assigned message id.
    pub message_id: Option<String>,
}

/// Long-polling SQS consumer. A poll may return a batch; the rest of the
/// batch is buffered and handed out one at a time. Redelivered messages are
/// left to the queue's visibility timeout.
#[derive(Debug)]
pub struct SqsConsumer {
    connector: SqsConnector,
    queue_url: String,
    max_number_of_messages: i32,
    wait_time_seconds: i32,
    buffer: Mutex<VecDeque<Message>>,
    switch: PauseSwitch,
    gate: AckGate,
    shutdown: Mutex<CancellationToken>,
}

impl SqsConsumer {
    /// Creates a consumer. No connection is made until [`Consumer::start`].
    #[must_use]
    pub fn new(
        SqsConsumerOptions {
            client,
            queue_url,
            max_number_of_messages,
            wait_time_seconds,
        }: SqsConsumerOptions,
    ) -> Self {
        Self {
            connector: SqsConnector::new(client),
            queue_url,
            max_number_of_messages: max_number_of_messages.clamp(1, 10),
            wait_time_seconds: wait_time_seconds.clamp(0, MAX_WAIT_TIME_SECONDS),
            buffer: Mutex::new(VecDeque::new()),
            switch: PauseSwitch::new(),
            gate: AckGate::new(),
            shutdown: Mutex::new(CancellationToken::new()),
        }
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

    /// Makes buffered messages visible again right away.
    async fn release_buffered(&self) {
        let buffered: Vec<Message> = self.buffer.lock().drain(..).collect();
        if buffered.is_empty() {
            return;
        }

        let Some(client) = self.connector.client() else {
            return;
        };

        for receipt_handle in buffered.into_iter().filter_map(|m| m.receipt_handle) {
            let released = client
                .change_message_visibility()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .visibility_timeout(0)
                .send()
                .await;

            if let Err(error) = released {
                let failure = SdkFailure::from_sdk("ChangeMessageVisibility", error);
                warn!(queue_url = %self.queue_url, %failure, "failed to release buffered message");
            }
        }
    }

    fn next_buffered(&self) -> Option<Delivery<SqsReceipt>> {
        let mut buffer = self.buffer.lock();

        while let Some(message) = buffer.pop_front() {
            let Some(receipt_handle) = message.receipt_handle else {
                warn!(queue_url = %self.queue_url, message_id = ?message.message_id, "message without receipt handle skipped");
                continue;
            };

            let payload = message.body.map(Bytes::from).unwrap_or_default();

            return Some(Delivery::new(
                payload,
                SqsReceipt {
                    receipt_handle,
                    message_id: message.message_id,
                },
            ));
        }

        None
    }
}

#[async_trait]
impl Consumer for SqsConsumer {
    type Error = Error;
    type Receipt = SqsReceipt;

    async fn start(&self) -> Result<(), Self::Error> {
        self.reset_shutdown();
        self.connector.connect().await;
        info!(queue_url = %self.queue_url, "sqs consumer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        self.shutdown_token().cancel();
        self.release_buffered().await;
        self.connector.disconnect();
        info!(queue_url = %self.queue_url, "sqs consumer stopped");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery<Self::Receipt>>, Self::Error> {
        let shutdown = self.shutdown_token();

        loop {
            tokio::select! {
                () = self.switch.wait_running() => {}
                () = shutdown.cancelled() => return Ok(None),
            }

            if let Some(delivery) = self.next_buffered() {
                debug!(queue_url = %self.queue_url, message_id = ?delivery.receipt.message_id, "delivering message");
                return Ok(Some(delivery));
            }

            let client = self.connector.client().ok_or(Error::NotStarted)?;
            let poll = client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(self.max_number_of_messages)
                .wait_time_seconds(self.wait_time_seconds)
                .send();

            let polled = tokio::select! {
                polled = poll => polled,
                () = shutdown.cancelled() => return Ok(None),
            };

            match polled {
                Ok(output) => {
                    let messages = output.messages.unwrap_or_default();
                    if !messages.is_empty() {
                        debug!(queue_url = %self.queue_url, count = messages.len(), "received batch");
                        self.buffer.lock().extend(messages);
                    }
                }
                Err(error) => {
                    let failure = SdkFailure::from_sdk("ReceiveMessage", error);
                    if !failure.is_retriable() {
                        return Err(failure.into());
                    }

                    warn!(queue_url = %self.queue_url, %failure, "receive failed, reconnecting");
                    self.connector.reconnect().await;
                }
            }
        }
    }

    #[instrument(skip(self, receipt), fields(queue_url = %self.queue_url, message_id = ?receipt.message_id))]
    async fn settle(
        &self,
        receipt: Self::Receipt,
        disposition: Disposition,
    ) -> Result<(), Self::Error> {
        let disposition = self.gate.apply(disposition);

        if disposition.acknowledges() {
            let client = self.connector.client().ok_or(Error::NotStarted)?;
            client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt.receipt_handle)
                .send()
                .await
                .map_err(|error| SdkFailure::from_sdk("DeleteMessage", error))?;

            debug!("message deleted");
        } else {
            debug!("message left for redelivery");
        }

        if disposition.pauses() {
            // buffered messages would stay invisible for the whole pause
            self.release_buffered().await;
            self.pause().await?;
        }

        Ok(())
    }

    async fn pause(&self) -> Result<bool, Self::Error> {
        let changed = self.switch.pause();
        if changed {
            info!(queue_url = %self.queue_url, "sqs consumer paused");
        }
        Ok(changed)
    }

    async fn resume(&self) -> Result<bool, Self::Error> {
        let changed = self.switch.resume();
        if changed {
            info!(queue_url = %self.queue_url, "sqs consumer resumed");
        }
        Ok(changed)
    }

    async fn cancel(&self) -> Result<(), Self::Error> {
        self.gate.arm();
        self.release_buffered().await;
        debug!(queue_url = %self.queue_url, "next delete suppressed");
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.switch.is_paused()
    }
}
