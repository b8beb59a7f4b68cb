//! Abstract interface for exchanging events over a broker or queue.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Consumers receive deliveries and decide how each one is settled.
pub mod consumer;

/// Deliveries and the dispositions they can be settled with.
pub mod delivery;

/// Flow control shared by consumer backends.
pub mod flow;

/// Producers send messages to named destinations.
pub mod producer;

pub use consumer::{Consumer, ConsumerError};
pub use delivery::{Delivery, Disposition};
pub use flow::{AckGate, PauseSwitch};
pub use producer::{Producer, ProducerError, SendOptions};
