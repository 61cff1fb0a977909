//! # Transport contracts consumed by the supervisors.
//!
//! The wire codec lives outside this crate. Supervisors drive a transport
//! through three object-safe traits:
//!
//! - [`ConnectFactory`] - opens TCP/AMQP connections.
//! - [`Connect`] - one live connection: model creation plus an asynchronous
//!   [`ConnectionEvent`] stream.
//! - [`Model`] - one AMQP channel: the method set used by topology,
//!   producers and consumers, plus an asynchronous [`ModelEvent`] stream.
//!
//! ## Rules
//! - A model is single-threaded by AMQP contract; only its channel
//!   supervisor's loop calls it.
//! - Event streams are taken exactly once (`take_events`); transport
//!   callbacks must never block on them.
//! - Broker refusals surface as [`TransportError::Rejected`]; wire faults
//!   as the other variants. Callers translate, never the transport.

mod types;

pub use types::{
    Arguments, CloseInitiator, CloseReason, ConnectionEvent, Deliver, DeliveryMode, ExchangeKind,
    ExchangeSpec, MessageProperties, ModelEvent, PublishArgs, QueueDeclareOk, QueueSpec,
    TableValue,
};

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Opens connections to a broker.
#[async_trait]
pub trait ConnectFactory: Send + Sync + 'static {
    /// Opens a connection, bounded by `timeout` and `cancel`.
    async fn open(
        &self,
        url: &str,
        connection_name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Connect>, TransportError>;
}

/// One live connection to the broker.
#[async_trait]
pub trait Connect: Send + Sync {
    /// True while the connection is usable.
    fn is_open(&self) -> bool;

    /// Local TCP port, when known.
    fn local_port(&self) -> Option<u16>;

    /// Opens a fresh model (channel) on this connection.
    async fn create_model(&self) -> Result<Box<dyn Model>, TransportError>;

    /// Takes the connection's event stream. First call wins; later calls
    /// return `None`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>>;

    /// Closes the connection with the given reason. Idempotent.
    async fn close(&self, reason: CloseReason);
}

/// One AMQP channel on a connection.
#[async_trait]
pub trait Model: Send + Sync {
    /// True while the channel is usable.
    fn is_open(&self) -> bool;

    /// Takes the channel's event stream. First call wins; later calls
    /// return `None`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ModelEvent>>;

    async fn exchange_declare(&self, spec: &ExchangeSpec) -> Result<(), TransportError>;

    async fn exchange_delete(&self, name: &str, if_unused: bool) -> Result<(), TransportError>;

    async fn queue_declare(&self, spec: &QueueSpec) -> Result<QueueDeclareOk, TransportError>;

    /// Deletes a queue, returning the number of messages it held.
    async fn queue_delete(
        &self,
        name: &str,
        if_unused: bool,
        if_empty: bool,
    ) -> Result<u32, TransportError>;

    /// Purges a queue, returning the number of messages removed.
    async fn queue_purge(&self, name: &str) -> Result<u32, TransportError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &Arguments,
    ) -> Result<(), TransportError>;

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &Arguments,
    ) -> Result<(), TransportError>;

    /// Puts the channel in publisher-confirm mode.
    async fn confirm_select(&self) -> Result<(), TransportError>;

    async fn basic_qos(&self, prefetch: u16) -> Result<(), TransportError>;

    /// Starts a consumer; returns the (possibly server-assigned) tag.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
        exclusive: bool,
    ) -> Result<String, TransportError>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;

    /// Publishes a message. In confirm mode the returned number is the
    /// broker-assigned publish sequence the eventual confirm refers to.
    async fn basic_publish(
        &self,
        args: &PublishArgs,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<u64, TransportError>;

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), TransportError>;

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), TransportError>;

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError>;

    /// Closes the channel. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}
