//! # Subscriber contract for the lifecycle stream.
//!
//! A [`Subscribe`] implementation observes what the link is doing:
//! reconnects, channel churn, topology passes, publish requeues. Each
//! subscriber runs behind its own bounded lane so a slow metrics exporter
//! cannot stall the supervisors or its siblings.
//!
//! ## Contract
//! - [`Subscribe::wants`] pre-filters by [`EventKind`]; events a subscriber
//!   is not interested in never enter its lane.
//! - The stream is diagnostic, never load-bearing: a lane that falls behind
//!   drops events for that subscriber (counted and logged), nothing blocks.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Observer of lifecycle events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event on this subscriber's worker.
    async fn on_event(&self, event: &Event);

    /// Stable name used in drop and panic diagnostics.
    fn name(&self) -> &'static str;

    /// Pre-dispatch filter. The default accepts every kind; a subscriber
    /// that only tracks connection health can narrow this instead of
    /// paying for channel-level noise.
    fn wants(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    /// Capacity of the lane feeding this subscriber's worker.
    fn queue_capacity(&self) -> usize {
        256
    }
}
