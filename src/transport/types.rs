//! Wire-neutral data types crossing the transport boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Who initiated a connection or channel shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    /// This library closed the handle on purpose (dispose).
    Application,
    /// A local fault inside the transport closed the handle.
    Library,
    /// The broker (or the network on its behalf) closed the handle.
    Peer,
}

impl CloseInitiator {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            CloseInitiator::Application => "application",
            CloseInitiator::Library => "library",
            CloseInitiator::Peer => "peer",
        }
    }
}

impl fmt::Display for CloseInitiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Why a connection or channel shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub initiator: CloseInitiator,
    pub code: u16,
    pub text: String,
}

impl CloseReason {
    pub fn new(initiator: CloseInitiator, code: u16, text: impl Into<String>) -> Self {
        Self {
            initiator,
            code,
            text: text.into(),
        }
    }

    /// Standard reason for an application-initiated close.
    pub fn application() -> Self {
        Self::new(CloseInitiator::Application, 200, "closed by application")
    }
}

/// A value in an AMQP argument table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// Argument table passed to declarations and bindings.
pub type Arguments = BTreeMap<String, TableValue>;

/// Exchange type as understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

/// Exchange declaration parameters.
#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    /// Verify existence instead of creating.
    pub passive: bool,
    pub arguments: Arguments,
}

impl ExchangeSpec {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: false,
            auto_delete: false,
            passive: false,
            arguments: Arguments::new(),
        }
    }
}

/// Queue declaration parameters. An empty name asks the broker to generate
/// one (returned in [`QueueDeclareOk`]).
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Verify existence instead of creating.
    pub passive: bool,
    pub arguments: Arguments,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
            passive: false,
            arguments: Arguments::new(),
        }
    }

    /// Server-named exclusive auto-delete queue.
    pub fn exclusive_server_named() -> Self {
        let mut spec = Self::new("");
        spec.exclusive = true;
        spec.auto_delete = true;
        spec
    }
}

/// Broker reply to a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclareOk {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Delivery mode of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    Persistent,
}

/// AMQP basic properties carried by a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub message_id: Option<String>,
    pub app_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub timestamp: Option<SystemTime>,
    pub delivery_mode: Option<DeliveryMode>,
    pub priority: Option<u8>,
    pub headers: Arguments,
}

/// Routing parameters of a single publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishArgs {
    pub exchange: String,
    pub routing_key: String,
    /// Ask the broker to return the message if it cannot be routed.
    pub mandatory: bool,
}

impl PublishArgs {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: false,
        }
    }
}

/// An inbound message as handed over by the transport.
#[derive(Debug, Clone)]
pub struct Deliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// Asynchronous events raised by a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection shut down; no further events follow.
    Shutdown(CloseReason),
    /// The broker paused publishes (flow control).
    Blocked { reason: String },
    /// The broker resumed publishes.
    Unblocked,
}

/// Asynchronous events raised by a model (channel).
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// The channel shut down; no further events follow.
    Shutdown(CloseReason),
    /// Publisher confirm: positive.
    Ack { delivery_tag: u64, multiple: bool },
    /// Publisher confirm: negative.
    Nack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
    /// A mandatory message came back unroutable.
    Return {
        reply_code: u16,
        reply_text: String,
        exchange: String,
        routing_key: String,
        properties: MessageProperties,
        body: Vec<u8>,
    },
    /// A delivery for one of this channel's consumers.
    Deliver(Deliver),
    /// The broker cancelled one of this channel's consumers.
    ConsumerCancelled { consumer_tag: String },
}
