//! # SubscriberSet: filtered fan-out of the lifecycle stream.
//!
//! One listener drains the [`Bus`]; every subscriber gets a dedicated lane
//! (bounded queue plus worker task). Dispatch applies the subscriber's
//! [`wants`](crate::Subscribe::wants) filter before enqueueing, so a
//! connection-health subscriber never queues channel churn.
//!
//! ```text
//! Bus ──► listener ──► dispatch(ev)
//!                        ├─ wants? ──► [lane A] ──► worker A ──► on_event
//!                        └─ wants? ──► [lane B] ──► worker B ──► on_event
//! ```
//!
//! A lane that falls behind drops events for its subscriber and keeps a
//! running count; a panicking subscriber loses only the event it was
//! handling. When the link and its supervisors release the bus, the
//! listener exits, lanes close, and workers drain what is queued and stop.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::events::{Bus, Event};

use super::Subscribe;

/// One subscriber's route: filter source, bounded queue, drop counter.
struct Lane {
    sub: Arc<dyn Subscribe>,
    tx: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

/// Filtered, non-blocking fan-out over the registered subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
}

impl SubscriberSet {
    /// Builds the lanes and starts the bus listener. The listener runs
    /// until every bus sender is gone.
    pub fn attach(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>) -> Arc<Self> {
        let lanes = subscribers.into_iter().map(Self::open_lane).collect();
        let set = Arc::new(Self { lanes });

        let mut rx = bus.subscribe();
        let fanout = Arc::clone(&set);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => fanout.dispatch(Arc::new(ev)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event listener lagged; skipping ahead");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        set
    }

    /// Routes one event to every lane whose subscriber wants its kind.
    /// Never blocks: a full lane drops the event for that subscriber.
    pub fn dispatch(&self, ev: Arc<Event>) {
        for lane in &self.lanes {
            if !lane.sub.wants(ev.kind) {
                continue;
            }
            match lane.tx.try_send(Arc::clone(&ev)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = lane.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        subscriber = lane.sub.name(),
                        dropped, "subscriber lagging; event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(
                        subscriber = lane.sub.name(),
                        "subscriber worker gone; event dropped"
                    );
                }
            }
        }
    }

    fn open_lane(sub: Arc<dyn Subscribe>) -> Lane {
        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
        let worker = Arc::clone(&sub);
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                let handled = AssertUnwindSafe(worker.on_event(ev.as_ref()))
                    .catch_unwind()
                    .await;
                if handled.is_err() {
                    warn!(subscriber = worker.name(), "subscriber panicked; event skipped");
                }
            }
        });
        Lane {
            sub,
            tx,
            dropped: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Recorder {
        name: &'static str,
        only: Option<EventKind>,
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, _event: &Event) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn wants(&self, kind: EventKind) -> bool {
            self.only.map_or(true, |k| k == kind)
        }
    }

    #[tokio::test]
    async fn bus_events_reach_every_interested_subscriber() {
        let bus = Bus::new(64);
        let all = Arc::new(AtomicUsize::new(0));
        let conn_only = Arc::new(AtomicUsize::new(0));
        let _set = SubscriberSet::attach(
            &bus,
            vec![
                Arc::new(Recorder {
                    name: "all",
                    only: None,
                    seen: Arc::clone(&all),
                }),
                Arc::new(Recorder {
                    name: "conn-only",
                    only: Some(EventKind::Connected),
                    seen: Arc::clone(&conn_only),
                }),
            ],
        );

        bus.publish(Event::now(EventKind::Connected));
        bus.publish(Event::now(EventKind::ChannelActive));
        bus.publish(Event::now(EventKind::ChannelStopped));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(all.load(Ordering::SeqCst), 3);
        assert_eq!(conn_only.load(Ordering::SeqCst), 1);
    }

    struct Panicker(Arc<AtomicUsize>);

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("subscriber bug");
        }

        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn a_panicking_subscriber_keeps_receiving_later_events() {
        let bus = Bus::new(64);
        let seen = Arc::new(AtomicUsize::new(0));
        let _set = SubscriberSet::attach(&bus, vec![Arc::new(Panicker(Arc::clone(&seen)))]);

        for _ in 0..3 {
            bus.publish(Event::now(EventKind::Connected));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
