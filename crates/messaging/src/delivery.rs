use bytes::Bytes;

/// One message handed out by a consumer, plus what the backend needs to
/// settle it later.
#[derive(Clone, Debug)]
pub struct Delivery<R> {
    /// Raw message body.
    pub payload: Bytes,

    /// Backend-specific handle passed back to `settle`.
    pub receipt: R,
}

impl<R> Delivery<R> {
    /// Creates a delivery.
    pub const fn new(payload: Bytes, receipt: R) -> Self {
        Self { payload, receipt }
    }

    /// Splits the delivery into payload and receipt.
    pub fn into_parts(self) -> (Bytes, R) {
        (self.payload, self.receipt)
    }
}

/// How a delivery is settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Commit or delete the message. It will not be delivered again.
    Ack,

    /// Leave the message for redelivery.
    Redeliver,

    /// Leave the message for redelivery and pause the consumer.
    RedeliverAndPause,
}

impl Disposition {
    /// Whether the message is committed.
    #[must_use]
    pub const fn acknowledges(self) -> bool {
        matches!(self, Self::Ack)
    }

    /// Whether the consumer pauses after settling.
    #[must_use]
    pub const fn pauses(self) -> bool {
        matches!(self, Self::RedeliverAndPause)
    }
}
