mod error;

pub use error::Error;

use crate::{SdkFailure, SqsClientOptions, SqsConnector};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use relay_messaging::{Producer, SendOptions};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const DEFAULT_GROUP_ID: &str = "default-group";

/// SQS producer. Destinations are queue URLs; a URL containing `fifo` gets a
/// message group and a fresh deduplication id on every send.
#[derive(Clone, Debug)]
pub struct SqsProducer {
    connector: Arc<SqsConnector>,
}

impl SqsProducer {
    /// Creates a producer. No connection is made until [`Producer::start`].
    #[must_use]
    pub fn new(options: SqsClientOptions) -> Self {
        Self {
            connector: Arc::new(SqsConnector::new(options)),
        }
    }

    async fn send_once(
        &self,
        queue_url: &str,
        body: &str,
        options: &SendOptions,
    ) -> Result<(), Error> {
        let client = self.connector.client().ok_or(Error::NotStarted)?;

        let mut request = client
            .send_message()
            .queue_url(queue_url)
            .message_body(body);

        if queue_url.contains("fifo") {
            request = request
                .message_group_id(options.group_id.as_deref().unwrap_or(DEFAULT_GROUP_ID))
                .message_deduplication_id(Uuid::new_v4().to_string());
        }

        let output = request
            .send()
            .await
            .map_err(|error| SdkFailure::from_sdk("SendMessage", error))?;

        debug!(queue_url, message_id = ?output.message_id, "message sent");
        Ok(())
    }
}

#[async_trait]
impl Producer for SqsProducer {
    type Error = Error;

    async fn start(&self) -> Result<(), Self::Error> {
        self.connector.connect().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        self.connector.disconnect();
        Ok(())
    }

    #[instrument(skip(self, message), fields(bytes = message.len()))]
    async fn send(
        &self,
        destination: &str,
        message: Bytes,
        options: SendOptions,
    ) -> Result<(), Self::Error> {
        let body = String::from_utf8(message.to_vec())?;

        match self.send_once(destination, &body, &options).await {
            Err(Error::Sqs(failure)) if failure.is_retriable() => {
                warn!(%failure, "send failed, reconnecting and retrying once");
                self.connector.reconnect().await;
                self.send_once(destination, &body, &options).await
            }
            result => result,
        }
    }
}
