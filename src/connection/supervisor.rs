//! # ConnectionSupervisor: owns the TCP/AMQP connection.
//!
//! Drives the connection state machine and hides every transient failure
//! behind indefinite recovery:
//!
//! ```text
//! Init ──initialize──► Opening ──success──► Open
//!        Opening ──failure──► Opening (after connection_recovery_interval)
//!        Open ──shutdown(peer|library)──► Opening (after interval)
//!        Open ──shutdown(application)──► Disposed
//!        any ──dispose──► Disposed
//! ```
//!
//! ## Rules
//! - Every state-affecting action runs as a unit on the supervisor's
//!   [`EventLoop`], so `Disconnected` is observed serialized with model
//!   creation requests that must fail.
//! - At most one live transport handle exists; a new connect disposes the
//!   previous handle first.
//! - `Connected` is published only after the new handle is attached.
//! - Open errors are logged and retried forever; only dispose ends the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::{Bus, Event, EventKind};
use crate::exec::{DisposeMode, EventLoop};
use crate::id::Ident;
use crate::transport::{
    CloseInitiator, CloseReason, Connect, ConnectFactory, ConnectionEvent, Model,
};

/// Observable state of a [`ConnectionSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Opening,
    Open,
    Disposed,
}

/// Supervises one broker connection and recovers it indefinitely.
pub struct ConnectionSupervisor {
    ident: Ident,
    cfg: Arc<LinkConfig>,
    factory: Arc<dyn ConnectFactory>,
    bus: Bus,
    eloop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    conn: Mutex<Option<Arc<dyn Connect>>>,
    generation: AtomicU64,
    dispose_token: CancellationToken,
    disposed: AtomicBool,
    started: AtomicBool,
}

impl ConnectionSupervisor {
    /// Creates the supervisor. With `auto_start` set in the configuration,
    /// connecting begins immediately.
    pub fn new(cfg: Arc<LinkConfig>, factory: Arc<dyn ConnectFactory>, bus: Bus) -> Arc<Self> {
        let ident = Ident::next("connection");
        let (state_tx, _) = watch::channel(ConnectionState::Init);
        let this = Arc::new(Self {
            ident,
            cfg: Arc::clone(&cfg),
            factory,
            bus,
            eloop: EventLoop::new(ident),
            state_tx,
            conn: Mutex::new(None),
            generation: AtomicU64::new(0),
            dispose_token: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            started: AtomicBool::new(false),
        });
        if cfg.auto_start {
            this.initialize();
        }
        this
    }

    /// Identity of this supervisor (log correlation).
    pub fn ident(&self) -> Ident {
        self.ident
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch channel mirroring state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Generation of the currently attached handle (0 before the first).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Dispose token; children derive linked tokens from it.
    pub fn dispose_token(&self) -> &CancellationToken {
        &self.dispose_token
    }

    /// Starts connecting. Idempotent.
    pub fn initialize(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(ident = %self.ident, url = %self.cfg.url, "initializing");
        self.schedule_connect(None);
    }

    /// Suspends until the connection is `Open`.
    pub async fn wait_open(&self, cancel: &CancellationToken) -> Result<(), LinkError> {
        let mut rx = self.state_tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Disposed => return Err(LinkError::Disposed),
                _ => {}
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(LinkError::Disposed);
                    }
                }
                _ = cancel.cancelled() => return Err(LinkError::Canceled),
            }
        }
    }

    /// Opens a fresh model on the current connection.
    ///
    /// Fails with [`LinkError::NotConnected`] unless the state is `Open` at
    /// the moment the unit runs on the supervisor's loop.
    pub async fn create_model(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Model>, LinkError> {
        let me = Arc::clone(self);
        let promise = self.eloop.schedule(cancel, move |_t| async move {
            if *me.state_tx.borrow() != ConnectionState::Open {
                return Err(LinkError::NotConnected);
            }
            let conn = me.conn.lock().unwrap().clone();
            match conn {
                Some(c) => Ok(c.create_model().await?),
                None => Err(LinkError::NotConnected),
            }
        });
        match promise.await {
            Ok(res) => res,
            Err(e) => Err(e.into()),
        }
    }

    /// Disposes the supervisor: closes the handle, publishes the terminal
    /// event, and stops the loop. Idempotent.
    pub async fn dispose(self: &Arc<Self>) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.dispose_token.cancel();
            let me = Arc::clone(self);
            let fin = self.eloop.schedule(CancellationToken::new(), move |_t| async move {
                let old = me.conn.lock().unwrap().take();
                if let Some(conn) = old {
                    conn.close(CloseReason::application()).await;
                }
                me.state_tx.send_replace(ConnectionState::Disposed);
                me.bus.publish(
                    Event::now(EventKind::ConnectionDisposed).with_component(me.ident),
                );
                info!(ident = %me.ident, "disposed");
            });
            let _ = fin.await;
        }
        self.eloop.dispose(DisposeMode::Wait).await;
    }

    fn schedule_connect(self: &Arc<Self>, delay: Option<Duration>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(d) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(d) => {}
                    _ = this.dispose_token.cancelled() => return,
                }
            }
            let me = Arc::clone(&this);
            let _ = this
                .eloop
                .schedule(this.dispose_token.child_token(), move |t| {
                    me.connect_unit(t)
                })
                .await;
        });
    }

    async fn connect_unit(self: Arc<Self>, cancel: CancellationToken) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        // A replaced handle is disposed before the new connect begins.
        let old = self.conn.lock().unwrap().take();
        if let Some(conn) = old {
            conn.close(CloseReason::application()).await;
        }

        self.state_tx.send_replace(ConnectionState::Opening);
        debug!(ident = %self.ident, url = %self.cfg.url, "opening connection");

        let opened = self
            .factory
            .open(
                &self.cfg.url,
                &self.cfg.connection_name,
                self.cfg.connection_timeout,
                &cancel,
            )
            .await;

        match opened {
            Ok(conn) => {
                let conn: Arc<dyn Connect> = Arc::from(conn);
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let events = conn.take_events();
                *self.conn.lock().unwrap() = Some(Arc::clone(&conn));
                self.state_tx.send_replace(ConnectionState::Open);
                info!(
                    ident = %self.ident,
                    generation,
                    local_port = ?conn.local_port(),
                    "connected"
                );
                self.bus
                    .publish(Event::now(EventKind::Connected).with_component(self.ident));
                if let Some(rx) = events {
                    self.spawn_event_pump(rx, generation);
                }
            }
            Err(e) => {
                if self.disposed.load(Ordering::SeqCst) || cancel.is_cancelled() {
                    return;
                }
                let interval = self.cfg.connection_recovery_interval;
                warn!(
                    ident = %self.ident,
                    error = %e,
                    retry_in = ?interval,
                    "connection attempt failed"
                );
                self.schedule_connect(Some(interval));
            }
        }
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        generation: u64,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.dispose_token.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Some(ConnectionEvent::Shutdown(reason)) => {
                            this.post_disconnect(generation, reason);
                            break;
                        }
                        Some(ConnectionEvent::Blocked { reason }) => {
                            warn!(ident = %this.ident, reason = %reason, "connection blocked");
                            this.bus.publish(
                                Event::now(EventKind::ConnectionBlocked)
                                    .with_component(this.ident)
                                    .with_error(reason),
                            );
                        }
                        Some(ConnectionEvent::Unblocked) => {
                            info!(ident = %this.ident, "connection unblocked");
                            this.bus.publish(
                                Event::now(EventKind::ConnectionUnblocked)
                                    .with_component(this.ident),
                            );
                        }
                        None => {
                            this.post_disconnect(
                                generation,
                                CloseReason::new(
                                    CloseInitiator::Library,
                                    0,
                                    "event stream closed",
                                ),
                            );
                            break;
                        }
                    }
                }
            }
        });
    }

    fn post_disconnect(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let me = Arc::clone(self);
        // The promise is dropped; the unit itself is already enqueued.
        drop(self.eloop.schedule(CancellationToken::new(), move |_t| {
            me.disconnect_unit(generation, reason)
        }));
    }

    async fn disconnect_unit(self: Arc<Self>, generation: u64, reason: CloseReason) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        // No handle attached means the shutdown raced a replacement; the
        // connect path already owns recovery.
        let Some(old) = self.conn.lock().unwrap().take() else {
            return;
        };
        self.state_tx.send_replace(ConnectionState::Opening);
        info!(
            ident = %self.ident,
            initiator = %reason.initiator,
            code = reason.code,
            text = %reason.text,
            "disconnected"
        );
        self.bus.publish(
            Event::now(EventKind::Disconnected)
                .with_component(self.ident)
                .with_initiator(reason.initiator)
                .with_code(reason.code)
                .with_error(reason.text.clone()),
        );
        old.close(CloseReason::application()).await;

        match reason.initiator {
            CloseInitiator::Application => {
                self.disposed.store(true, Ordering::SeqCst);
                self.dispose_token.cancel();
                self.state_tx.send_replace(ConnectionState::Disposed);
                self.bus
                    .publish(Event::now(EventKind::ConnectionDisposed).with_component(self.ident));
            }
            _ => {
                self.schedule_connect(Some(self.cfg.connection_recovery_interval));
            }
        }
    }
}
