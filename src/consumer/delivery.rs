//! # Delivery model and acknowledgement decisions.

use crate::transport::MessageProperties;

/// An inbound message as seen by a user handler.
///
/// The delivery tag is only meaningful within the channel generation that
/// produced it; the consumer core drops acknowledgements whose generation no
/// longer matches.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned tag, monotonic within the channel.
    pub tag: u64,
    /// Channel generation the delivery arrived on.
    pub generation: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub consumer_tag: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
    pub(crate) from_this_app: bool,
}

impl Delivery {
    /// True when the message's `app_id` equals this link's application id.
    pub fn is_from_this_app(&self) -> bool {
        self.from_this_app
    }
}

/// What to tell the broker about a handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Acknowledge.
    Ack,
    /// Negative-acknowledge, optionally requeueing.
    Nack { requeue: bool },
    /// Reject, optionally requeueing.
    Reject { requeue: bool },
}
