mod error;

pub use error::Error;

use crate::MemoryBroker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use relay_messaging::{Producer, SendOptions};
use tracing::debug;

/// Producer for a [`MemoryBroker`]. Send options are accepted and ignored.
#[derive(Clone, Debug)]
pub struct MemoryProducer {
    broker: MemoryBroker,
    stopped: Arc<AtomicBool>,
}

impl MemoryProducer {
    pub(crate) fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    type Error = Error;

    async fn start(&self) -> Result<(), Self::Error> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(
        &self,
        destination: &str,
        message: Bytes,
        _options: SendOptions,
    ) -> Result<(), Self::Error> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }

        debug!(destination, bytes = message.len(), "sending message");
        self.broker.queue(destination).push_back(message);

        Ok(())
    }
}
