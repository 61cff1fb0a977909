//! # ChannelSupervisor: owns one AMQP channel on a connection.
//!
//! Runs a dedicated loop task keyed by [`ChannelState`]:
//!
//! ```text
//! Init ──► Open ──model ok──► Active ──fault/conn-loss/dispose──► Stop
//!            ▲                                                     │
//!            │           (disposing? ──► Disposed)                 │
//!            └───────────────── Reopen ◄───────────────────────────┘
//! ```
//!
//! ## Rules
//! - `Reopen` sleeps `channel_recovery_interval` only while the connection
//!   is currently open; otherwise it waits for the connection instead.
//! - `on_connecting` runs concurrently with model creation and is canceled
//!   once the attempt resolves either way.
//! - Every `on_active` has a matching active-token cancellation before the
//!   next `on_active` begins.
//! - Model close errors during `Stop` are logged and swallowed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::handler::{ActiveChannel, ChannelHandler, ReturnedMessage};
use crate::config::LinkConfig;
use crate::connection::{ConnectionState, ConnectionSupervisor};
use crate::events::{Bus, Event, EventKind};
use crate::id::Ident;
use crate::transport::{CloseInitiator, CloseReason, Model, ModelEvent};

/// States of the channel loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Init,
    Open,
    Reopen,
    Active,
    Stop,
    Disposed,
}

/// Supervises one channel: opens models, hands them to the handler, and
/// re-opens after every fault until disposed.
pub struct ChannelSupervisor {
    ident: Ident,
    cfg: Arc<LinkConfig>,
    conn: Arc<ConnectionSupervisor>,
    handler: Arc<dyn ChannelHandler>,
    bus: Bus,
    dispose_token: CancellationToken,
    generation: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelSupervisor {
    /// Creates the supervisor and starts its loop task. The dispose token
    /// is linked to the connection's, so disposing the connection cascades.
    pub fn spawn(
        cfg: Arc<LinkConfig>,
        conn: Arc<ConnectionSupervisor>,
        handler: Arc<dyn ChannelHandler>,
        bus: Bus,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            ident: Ident::next("channel"),
            cfg,
            dispose_token: conn.dispose_token().child_token(),
            conn,
            handler,
            bus,
            generation: AtomicU64::new(0),
            worker: Mutex::new(None),
        });
        let runner = Arc::clone(&this);
        *this.worker.lock().unwrap() = Some(tokio::spawn(runner.run()));
        this
    }

    /// Identity of this supervisor (log correlation).
    pub fn ident(&self) -> Ident {
        self.ident
    }

    /// Generation of the model currently (or last) handed to the handler.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Dispose token; fires when this channel or its connection disposes.
    pub fn dispose_token(&self) -> &CancellationToken {
        &self.dispose_token
    }

    /// Stops the loop and waits for it to reach `Disposed`. Idempotent.
    pub async fn dispose(&self) {
        self.dispose_token.cancel();
        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let mut state = ChannelState::Init;
        let mut model: Option<Arc<dyn Model>> = None;

        loop {
            match state {
                ChannelState::Init => {
                    state = ChannelState::Open;
                }

                ChannelState::Open | ChannelState::Reopen => {
                    if state == ChannelState::Reopen
                        && self.conn.state() == ConnectionState::Open
                    {
                        tokio::select! {
                            _ = tokio::time::sleep(self.cfg.channel_recovery_interval) => {}
                            _ = self.dispose_token.cancelled() => {
                                state = ChannelState::Stop;
                                continue;
                            }
                        }
                    }

                    if self.conn.wait_open(&self.dispose_token).await.is_err() {
                        state = ChannelState::Stop;
                        continue;
                    }

                    let connecting_cts = self.dispose_token.child_token();
                    let handler = Arc::clone(&self.handler);
                    let cts = connecting_cts.clone();
                    let connecting =
                        tokio::spawn(async move { handler.on_connecting(cts).await });

                    let created = self
                        .conn
                        .create_model(self.dispose_token.child_token())
                        .await;
                    connecting_cts.cancel();
                    let _ = connecting.await;

                    match created {
                        Ok(m) => {
                            model = Some(Arc::from(m));
                            state = ChannelState::Active;
                        }
                        Err(e) => {
                            debug!(ident = %self.ident, error = %e, "model open failed");
                            state = ChannelState::Stop;
                        }
                    }
                }

                ChannelState::Active => {
                    let Some(m) = model.clone() else {
                        state = ChannelState::Stop;
                        continue;
                    };
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let active_cts = self.dispose_token.child_token();

                    let (fault_tx, mut fault_rx) = oneshot::channel();
                    let pump = self.spawn_model_pump(&m, active_cts.clone(), fault_tx);

                    info!(ident = %self.ident, generation, "channel active");
                    self.bus
                        .publish(Event::now(EventKind::ChannelActive).with_component(self.ident));

                    let handler = Arc::clone(&self.handler);
                    let active = ActiveChannel {
                        model: Arc::clone(&m),
                        generation,
                    };
                    let handler_cts = active_cts.clone();
                    let handler_task =
                        tokio::spawn(async move { handler.on_active(active, handler_cts).await });

                    // A handler returning early is not a fault; the channel
                    // stays active until one of these fires.
                    tokio::select! {
                        _ = self.dispose_token.cancelled() => {}
                        reason = &mut fault_rx => {
                            if let Ok(r) = reason {
                                info!(
                                    ident = %self.ident,
                                    initiator = %r.initiator,
                                    code = r.code,
                                    text = %r.text,
                                    "model shut down"
                                );
                            }
                        }
                        _ = Self::conn_lost(self.conn.subscribe_state()) => {}
                    }

                    active_cts.cancel();
                    let _ = handler_task.await;
                    let _ = pump.await;
                    state = ChannelState::Stop;
                }

                ChannelState::Stop => {
                    if let Some(m) = model.take() {
                        if let Err(e) = m.close().await {
                            debug!(ident = %self.ident, error = %e, "model close failed");
                        }
                        self.bus.publish(
                            Event::now(EventKind::ChannelStopped).with_component(self.ident),
                        );
                    }
                    state = if self.dispose_token.is_cancelled() {
                        ChannelState::Disposed
                    } else {
                        ChannelState::Reopen
                    };
                }

                ChannelState::Disposed => {
                    info!(ident = %self.ident, "disposed");
                    self.bus
                        .publish(Event::now(EventKind::ChannelDisposed).with_component(self.ident));
                    break;
                }
            }
        }
    }

    /// Resolves once the connection leaves `Open`.
    async fn conn_lost(mut rx: watch::Receiver<ConnectionState>) {
        loop {
            if *rx.borrow_and_update() != ConnectionState::Open {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn spawn_model_pump(
        self: &Arc<Self>,
        model: &Arc<dyn Model>,
        active_cts: CancellationToken,
        fault_tx: oneshot::Sender<CloseReason>,
    ) -> JoinHandle<()> {
        let events = model.take_events();
        let handler = Arc::clone(&self.handler);
        let ident = self.ident;

        tokio::spawn(async move {
            let Some(mut rx) = events else {
                let _ = fault_tx.send(CloseReason::new(
                    CloseInitiator::Library,
                    0,
                    "model event stream unavailable",
                ));
                return;
            };
            let mut fault_tx = Some(fault_tx);

            loop {
                tokio::select! {
                    _ = active_cts.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Some(ModelEvent::Ack { delivery_tag, multiple }) => {
                            handler.on_ack(delivery_tag, multiple);
                        }
                        Some(ModelEvent::Nack { delivery_tag, multiple, requeue }) => {
                            handler.on_nack(delivery_tag, multiple, requeue);
                        }
                        Some(ModelEvent::Return {
                            reply_code,
                            reply_text,
                            exchange,
                            routing_key,
                            properties,
                            body,
                        }) => {
                            handler.on_return(ReturnedMessage {
                                reply_code,
                                reply_text,
                                exchange,
                                routing_key,
                                properties,
                                body,
                            });
                        }
                        Some(ModelEvent::Deliver(d)) => handler.on_deliver(d),
                        Some(ModelEvent::Shutdown(reason)) => {
                            if let Some(tx) = fault_tx.take() {
                                let _ = tx.send(reason);
                            }
                            break;
                        }
                        Some(ModelEvent::ConsumerCancelled { consumer_tag }) => {
                            warn!(ident = %ident, consumer_tag = %consumer_tag, "consumer cancelled by broker");
                            if let Some(tx) = fault_tx.take() {
                                let _ = tx.send(CloseReason::new(
                                    CloseInitiator::Peer,
                                    0,
                                    "consumer cancelled",
                                ));
                            }
                            break;
                        }
                        None => {
                            if let Some(tx) = fault_tx.take() {
                                let _ = tx.send(CloseReason::new(
                                    CloseInitiator::Library,
                                    0,
                                    "model event stream closed",
                                ));
                            }
                            break;
                        }
                    }
                }
            }
        })
    }
}
