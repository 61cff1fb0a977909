//! # TopologyRunner: declares and re-declares topology on its channel.
//!
//! Two modes:
//!
//! - **Persistent** - reconfigure on every channel activation. Broker
//!   rejections call the error hook and retry after
//!   `topology_recovery_interval`; the runner stays alive until disposed.
//! - **Once** - declare exactly once. Success fires the waiter and the
//!   runner asks its owner to dispose it; a broker rejection fails the
//!   waiter the same way. Transient channel loss retries on the next
//!   activation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ActiveChannel, ChannelHandler};
use crate::config::LinkConfig;
use crate::error::TopologyError;
use crate::events::{Bus, Event, EventKind};
use crate::id::Ident;
use crate::topology::ops::{TopologyMap, TopologyOps};

/// Declaration cadence of a [`TopologyRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
    /// Declare once, then self-dispose.
    Once,
    /// Re-declare on every channel activation.
    Persistent,
}

/// Hook invoked after each successful declaration pass.
pub type ReadyHook = Arc<dyn Fn() + Send + Sync>;

/// Hook invoked on each failed declaration pass.
pub type ErrorHook = Arc<dyn Fn(&TopologyError) + Send + Sync>;

/// Channel handler that applies a configuration callback.
pub struct TopologyRunner {
    ident: Ident,
    cfg: Arc<LinkConfig>,
    mode: TopologyMode,
    map: TopologyMap,
    ready_hook: Option<ReadyHook>,
    error_hook: Option<ErrorHook>,
    bus: Bus,
    waiter: Mutex<Option<oneshot::Sender<Result<(), TopologyError>>>>,
    self_dispose: CancellationToken,
}

impl TopologyRunner {
    /// Creates the runner. In `Once` mode the returned receiver resolves
    /// with the outcome of the single declaration pass.
    pub fn new(
        cfg: Arc<LinkConfig>,
        mode: TopologyMode,
        map: TopologyMap,
        ready_hook: Option<ReadyHook>,
        error_hook: Option<ErrorHook>,
        bus: Bus,
    ) -> (Arc<Self>, Option<oneshot::Receiver<Result<(), TopologyError>>>) {
        let (waiter, rx) = match mode {
            TopologyMode::Once => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            TopologyMode::Persistent => (None, None),
        };
        let runner = Arc::new(Self {
            ident: Ident::next("topology"),
            cfg,
            mode,
            map,
            ready_hook,
            error_hook,
            bus,
            waiter: Mutex::new(waiter),
            self_dispose: CancellationToken::new(),
        });
        (runner, rx)
    }

    /// Identity of this runner (log correlation).
    pub fn ident(&self) -> Ident {
        self.ident
    }

    /// Fires when the runner wants its owner to dispose the channel.
    pub fn self_dispose_token(&self) -> &CancellationToken {
        &self.self_dispose
    }

    fn settle_waiter(&self, outcome: Result<(), TopologyError>) {
        if let Some(tx) = self.waiter.lock().unwrap().take() {
            let _ = tx.send(outcome);
        }
    }

    fn publish_applied(&self) {
        info!(ident = %self.ident, "topology applied");
        self.bus
            .publish(Event::now(EventKind::TopologyApplied).with_component(self.ident));
        if let Some(hook) = &self.ready_hook {
            hook();
        }
    }

    fn publish_failed(&self, err: &TopologyError) {
        warn!(ident = %self.ident, error = %err, "topology pass failed");
        self.bus.publish(
            Event::now(EventKind::TopologyFailed)
                .with_component(self.ident)
                .with_error(err.to_string()),
        );
        if let Some(hook) = &self.error_hook {
            hook(err);
        }
    }
}

#[async_trait]
impl ChannelHandler for TopologyRunner {
    async fn on_active(&self, channel: ActiveChannel, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            debug!(ident = %self.ident, generation = channel.generation, "configuring");

            match (self.map)(TopologyOps::new(channel.clone())).await {
                Ok(()) => {
                    self.publish_applied();
                    if self.mode == TopologyMode::Once {
                        self.settle_waiter(Ok(()));
                        self.self_dispose.cancel();
                    }
                    return;
                }
                Err(e) => {
                    self.publish_failed(&e);
                    match self.mode {
                        TopologyMode::Once => {
                            if e.is_rejection() {
                                self.settle_waiter(Err(e));
                                self.self_dispose.cancel();
                            }
                            // Channel loss retries on the next activation.
                            return;
                        }
                        TopologyMode::Persistent => {
                            if !e.is_rejection() {
                                return;
                            }
                            tokio::select! {
                                _ = tokio::time::sleep(self.cfg.topology_recovery_interval) => {}
                                _ = cancel.cancelled() => return,
                            }
                        }
                    }
                }
            }
        }
    }
}
