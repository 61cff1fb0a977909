//! # Error types used across the link runtime.
//!
//! The crate splits failures by the surface they appear on:
//!
//! - [`TransportError`] - faults raised by the transport implementation.
//!   Recoverable ones never reach users; supervisors absorb them and retry.
//! - [`LinkError`] - supervisor-level operations (model creation, waits).
//! - [`PublishError`] - failures settled on a publish promise.
//! - [`TopologyError`] - declaration failures surfaced to topology hooks
//!   and once-mode waiters.
//! - [`ConsumeError`] - failures returned by user delivery handlers.
//! - [`ExecError`] - failures of units scheduled on an event loop.
//! - [`ConfigError`] - invalid configuration at build time.
//!
//! All types provide `as_label()` returning a short stable snake_case label
//! for logs and metrics.

use std::time::Duration;

use thiserror::Error;

/// Faults raised by the transport layer (wire, broker RPC refusals).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection attempt itself failed (refused, unreachable, handshake).
    #[error("connect failed: {reason}")]
    Connect { reason: String },

    /// The connection attempt exceeded its deadline.
    #[error("connect timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    /// An I/O fault on an established connection or channel.
    #[error("i/o failure: {reason}")]
    Io { reason: String },

    /// The broker refused the operation (AMQP channel/connection exception).
    #[error("rejected by broker: {code} {text}")]
    Rejected { code: u16, text: String },

    /// The underlying connection is no longer open.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The underlying channel is no longer open.
    #[error("channel is closed")]
    ChannelClosed,
}

impl TransportError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Connect { .. } => "transport_connect",
            TransportError::ConnectTimeout { .. } => "transport_connect_timeout",
            TransportError::Io { .. } => "transport_io",
            TransportError::Rejected { .. } => "transport_rejected",
            TransportError::ConnectionClosed => "transport_connection_closed",
            TransportError::ChannelClosed => "transport_channel_closed",
        }
    }

    /// True for broker refusals, which are not transient wire faults.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected { .. })
    }
}

/// Errors returned by supervisor-level operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The operation requires an open connection.
    #[error("not connected")]
    NotConnected,

    /// The caller's cancellation fired before completion.
    #[error("canceled")]
    Canceled,

    /// The target supervisor has been disposed.
    #[error("disposed")]
    Disposed,

    /// The transport failed while executing the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl LinkError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            LinkError::NotConnected => "link_not_connected",
            LinkError::Canceled => "link_canceled",
            LinkError::Disposed => "link_disposed",
            LinkError::Transport(e) => e.as_label(),
        }
    }
}

/// Failures settled on a publish promise.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker negatively acknowledged the message.
    #[error("message nacked by broker")]
    Nacked,

    /// The message was returned as unroutable (mandatory flag set).
    #[error("message returned as unroutable: {code} {text}")]
    Returned { code: u16, text: String },

    /// No confirm arrived within the configured deadline.
    #[error("confirm not received within {timeout:?}")]
    ConfirmTimeout { timeout: Duration },

    /// The caller's cancellation fired before dispatch.
    #[error("publish canceled")]
    Canceled,

    /// The producer was disposed before the message could be dispatched.
    #[error("producer disposed")]
    Disposed,
}

impl PublishError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::Nacked => "publish_nacked",
            PublishError::Returned { .. } => "publish_returned",
            PublishError::ConfirmTimeout { .. } => "publish_confirm_timeout",
            PublishError::Canceled => "publish_canceled",
            PublishError::Disposed => "publish_disposed",
        }
    }
}

/// Failures surfaced by topology configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The broker refused a declaration (passive miss, type mismatch, ...).
    #[error("declaration rejected by broker: {code} {text}")]
    Rejected { code: u16, text: String },

    /// The configuration callback failed on its own.
    #[error("configuration callback failed: {reason}")]
    Callback { reason: String },

    /// The channel was lost mid-configuration; retried on the next activation.
    #[error("channel lost during configuration")]
    ChannelLost,

    /// The waiter's cancellation fired.
    #[error("topology wait canceled")]
    Canceled,

    /// The runner was disposed before configuration completed.
    #[error("topology runner disposed")]
    Disposed,
}

impl TopologyError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            TopologyError::Rejected { .. } => "topology_rejected",
            TopologyError::Callback { .. } => "topology_callback",
            TopologyError::ChannelLost => "topology_channel_lost",
            TopologyError::Canceled => "topology_canceled",
            TopologyError::Disposed => "topology_disposed",
        }
    }

    /// True for outcomes that will not improve by retrying on this channel.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TopologyError::Rejected { .. } | TopologyError::Callback { .. }
        )
    }

    pub(crate) fn from_transport(e: TransportError) -> Self {
        match e {
            TransportError::Rejected { code, text } => TopologyError::Rejected { code, text },
            _ => TopologyError::ChannelLost,
        }
    }
}

/// Failures returned by user delivery handlers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumeError {
    /// The handler failed; the delivery is nacked per configuration.
    #[error("handler failed: {reason}")]
    Handler { reason: String },
}

impl ConsumeError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConsumeError::Handler { .. } => "consume_handler",
        }
    }
}

/// Failures of units scheduled on an event loop.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The unit's cancellation fired before it started.
    #[error("unit canceled before start")]
    Canceled,

    /// The loop was disposed before the unit could run.
    #[error("event loop disposed")]
    Disposed,
}

impl ExecError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::Canceled => "exec_canceled",
            ExecError::Disposed => "exec_disposed",
        }
    }
}

impl From<ExecError> for LinkError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Canceled => LinkError::Canceled,
            ExecError::Disposed => LinkError::Disposed,
        }
    }
}

/// Invalid configuration detected at build time.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration field holds an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
