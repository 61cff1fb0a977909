//! # Event bus for broadcasting lifecycle events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`] so supervisors can publish
//! [`Event`]s to any number of observers without coordination.
//!
//! - **Broadcast semantics**: every active subscriber sees a clone of each
//!   event.
//! - **Non-persistent**: events published with no subscribers are dropped.
//! - **Bounded capacity**: slow subscribers observe `Lagged` and skip ahead.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for lifecycle events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Errors are ignored when there are no active subscribers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Subscribes to the bus and returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn subscribers_each_receive_published_events() {
        let bus = Bus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(Event::now(EventKind::Connected));

        assert_eq!(a.recv().await.unwrap().kind, EventKind::Connected);
        assert_eq!(b.recv().await.unwrap().kind, EventKind::Connected);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = Bus::new(16);
        bus.publish(Event::now(EventKind::Connected));
    }
}
