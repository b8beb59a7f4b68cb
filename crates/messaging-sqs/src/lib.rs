//! Managed queue backend for the messaging traits, built on the AWS SDK.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;

/// Long-polling consumer with per-message delete.
pub mod consumer;

/// Producer with FIFO group and deduplication handling.
pub mod producer;

pub use client::{SdkFailure, SqsClientOptions, SqsConnector};
pub use consumer::{SqsConsumer, SqsConsumerOptions, SqsReceipt};
pub use producer::SqsProducer;
