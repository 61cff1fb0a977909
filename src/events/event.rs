//! # Lifecycle events emitted by the supervisors.
//!
//! [`EventKind`] classifies what happened; [`Event`] carries the metadata:
//! which component, when, the shutdown initiator, error text, retry delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Events can be re-ordered correctly even when observed
//! through buffered async channels.
//!
//! ## Event flow examples
//!
//! ### Connection recovery
//! ```text
//! Connected
//!   → Disconnected (initiator=peer)
//!   → [sleep connection_recovery_interval]
//!   → Connected
//! ```
//!
//! ### Channel loss under a persistent topology
//! ```text
//! ChannelActive → TopologyApplied
//!   → ChannelStopped → ChannelActive → TopologyApplied
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::transport::CloseInitiator;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Connection ===
    /// A connection to the broker is live.
    Connected,
    /// The connection was lost (initiator and code attached).
    Disconnected,
    /// The broker paused publishes on this connection.
    ConnectionBlocked,
    /// The broker resumed publishes.
    ConnectionUnblocked,
    /// The connection supervisor reached its terminal state.
    ConnectionDisposed,

    // === Channel ===
    /// A channel handed a live model to its handler.
    ChannelActive,
    /// A channel lost its model and is heading for re-open.
    ChannelStopped,
    /// The channel supervisor reached its terminal state.
    ChannelDisposed,

    // === Components ===
    /// A topology pass completed successfully.
    TopologyApplied,
    /// A topology pass failed (error attached).
    TopologyFailed,
    /// Unconfirmed publishes were moved back for re-dispatch (count attached).
    PublishesRequeued,
    /// A consumer registered with the broker.
    ConsumerStarted,
}

/// Lifecycle event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Identity of the component that emitted the event.
    pub component: Option<String>,
    /// Who initiated a shutdown, if the event represents one.
    pub initiator: Option<CloseInitiator>,
    /// AMQP reply code, if relevant.
    pub code: Option<u16>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Recovery delay scheduled after this event, if any.
    pub delay: Option<Duration>,
    /// Item count (e.g. how many publishes were requeued).
    pub count: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            initiator: None,
            code: None,
            error: None,
            delay: None,
            count: None,
        }
    }

    /// Attaches the emitting component's identity.
    pub fn with_component(mut self, ident: impl ToString) -> Self {
        self.component = Some(ident.to_string());
        self
    }

    /// Attaches a shutdown initiator.
    pub fn with_initiator(mut self, initiator: CloseInitiator) -> Self {
        self.initiator = Some(initiator);
        self
    }

    /// Attaches an AMQP reply code.
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a recovery delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches an item count.
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::now(EventKind::Connected);
        let b = Event::now(EventKind::Disconnected);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::Disconnected)
            .with_component("connection-1")
            .with_initiator(CloseInitiator::Peer)
            .with_code(320)
            .with_error("connection forced");
        assert_eq!(ev.component.as_deref(), Some("connection-1"));
        assert_eq!(ev.initiator, Some(CloseInitiator::Peer));
        assert_eq!(ev.code, Some(320));
    }
}
