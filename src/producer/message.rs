//! # Outbound message model.
//!
//! An [`OutboundMessage`] bundles AMQP properties, routing parameters and
//! the body bytes. Serialization is the caller's business; bodies are raw
//! bytes.

use tokio::sync::OwnedSemaphorePermit;

use crate::error::PublishError;
use crate::transport::{DeliveryMode, MessageProperties, PublishArgs};
use crate::work::WorkItem;

/// A message handed to [`Producer::publish`](crate::Producer::publish).
pub struct OutboundMessage {
    pub properties: MessageProperties,
    pub publish: PublishArgs,
    pub body: Vec<u8>,
    /// Backpressure permit held until the message leaves the pipeline.
    pub(crate) permit: Option<OwnedSemaphorePermit>,
}

impl OutboundMessage {
    /// Creates a message for the given exchange and routing key.
    pub fn to(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            properties: MessageProperties::default(),
            publish: PublishArgs::new(exchange, routing_key),
            body: Vec::new(),
            permit: None,
        }
    }

    /// Sets the body bytes.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces the full property set.
    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Sets the message id (assigned automatically when omitted).
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.properties.message_id = Some(id.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.properties.correlation_id = Some(id.into());
        self
    }

    /// Sets the delivery mode.
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.properties.delivery_mode = Some(mode);
        self
    }

    /// Asks the broker to return the message when unroutable.
    pub fn mandatory(mut self) -> Self {
        self.publish.mandatory = true;
        self
    }
}

/// Work item flowing through the publish pipeline.
pub type PublishItem = WorkItem<OutboundMessage, (), PublishError>;
