//! # Link: the application's persistent relationship with one broker.
//!
//! A [`Link`] owns one [`ConnectionSupervisor`]. Producers, consumers and
//! topology configurators are built from it; each owns a
//! [`ChannelSupervisor`] bound to the link's connection and reacts to
//! channel activations through its handler.
//!
//! ```text
//! LinkConfig ──► LinkBuilder::build(factory)
//!                     │
//!                     ├──► ConnectionSupervisor (auto-start optional)
//!                     ├──► Bus ──► SubscriberSet listener
//!                     │
//!                     ├──► link.producer()  ──► Producer  (ChannelSupervisor + ProducerCore)
//!                     ├──► link.consumer()  ──► Consumer  (ChannelSupervisor + ConsumerCore)
//!                     └──► link.topology()  ──► Topology / OnceTopology (+ TopologyRunner)
//! ```
//!
//! Disposal cascades top-down: disposing the link disposes the connection,
//! which cancels every channel's linked token.

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelSupervisor;
use crate::config::LinkConfig;
use crate::connection::{ConnectionState, ConnectionSupervisor};
use crate::consumer::{ConsumerCore, HandlerRef, QueueSource};
use crate::error::{ConfigError, PublishError, TopologyError};
use crate::events::{Bus, Event};
use crate::id::Ident;
use crate::producer::{OutboundMessage, ProducerCore};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::topology::{
    ConsumerTopologyMap, ErrorHook, ReadyHook, TopologyMap, TopologyMode, TopologyRunner,
};
use crate::transport::ConnectFactory;

/// Builder wiring a [`Link`] from a configuration record.
pub struct LinkBuilder {
    cfg: LinkConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl LinkBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: LinkConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the configuration and builds the link.
    pub fn build(self, factory: Arc<dyn ConnectFactory>) -> Result<Link, ConfigError> {
        let cfg = self.cfg;
        if cfg.url.trim().is_empty() {
            return Err(ConfigError::invalid("url", "must not be empty"));
        }
        if cfg.connection_timeout.is_zero() {
            return Err(ConfigError::invalid("connection_timeout", "must be positive"));
        }
        if cfg.connection_recovery_interval.is_zero() {
            return Err(ConfigError::invalid(
                "connection_recovery_interval",
                "must be positive",
            ));
        }
        if cfg.channel_recovery_interval.is_zero() {
            return Err(ConfigError::invalid(
                "channel_recovery_interval",
                "must be positive",
            ));
        }
        if cfg.topology_recovery_interval.is_zero() {
            return Err(ConfigError::invalid(
                "topology_recovery_interval",
                "must be positive",
            ));
        }

        let cfg = Arc::new(cfg);
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = SubscriberSet::attach(&bus, self.subscribers);

        let conn = ConnectionSupervisor::new(Arc::clone(&cfg), factory, bus.clone());
        Ok(Link {
            cfg,
            conn,
            bus,
            _subs: subs,
        })
    }
}

/// The top-level handle: one connection, many channels.
pub struct Link {
    cfg: Arc<LinkConfig>,
    conn: Arc<ConnectionSupervisor>,
    bus: Bus,
    _subs: Arc<SubscriberSet>,
}

impl Link {
    /// Shorthand for [`LinkBuilder::new`].
    pub fn builder(cfg: LinkConfig) -> LinkBuilder {
        LinkBuilder::new(cfg)
    }

    /// The immutable configuration this link was built from.
    pub fn configuration(&self) -> &LinkConfig {
        &self.cfg
    }

    /// Identity of the connection supervisor (log correlation).
    pub fn ident(&self) -> Ident {
        self.conn.ident()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Starts connecting. Idempotent; implicit when `auto_start` is set.
    pub fn initialize(&self) {
        self.conn.initialize();
    }

    /// Suspends until the connection is open.
    pub async fn wait_open(&self, cancel: &CancellationToken) -> Result<(), crate::LinkError> {
        self.conn.wait_open(cancel).await
    }

    /// Raw receiver of lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Builder for a producer channel.
    pub fn producer(&self) -> ProducerBuilder<'_> {
        ProducerBuilder {
            link: self,
            topology: None,
        }
    }

    /// Builder for a consumer channel.
    pub fn consumer(&self) -> ConsumerBuilder<'_> {
        ConsumerBuilder {
            link: self,
            source: None,
            handler: None,
            prefetch: None,
            auto_ack: false,
            requeue_on_error: true,
            exclusive: false,
        }
    }

    /// Builder for a topology configurator.
    pub fn topology(&self) -> TopologyBuilder<'_> {
        TopologyBuilder {
            link: self,
            ready_hook: None,
            error_hook: None,
        }
    }

    /// Disposes the connection; every channel built from this link follows.
    pub async fn dispose(&self) {
        self.conn.dispose().await;
    }
}

/// Builds a [`Producer`].
pub struct ProducerBuilder<'a> {
    link: &'a Link,
    topology: Option<TopologyMap>,
}

impl ProducerBuilder<'_> {
    /// Topology applied on every channel activation before publishing
    /// resumes (e.g. declaring the exchange published into).
    pub fn with_topology(mut self, map: TopologyMap) -> Self {
        self.topology = Some(map);
        self
    }

    /// Builds the producer and starts its channel.
    pub fn build(self) -> Producer {
        let core = ProducerCore::new(
            Arc::clone(&self.link.cfg),
            self.topology,
            self.link.bus.clone(),
        );
        let chan = ChannelSupervisor::spawn(
            Arc::clone(&self.link.cfg),
            Arc::clone(&self.link.conn),
            core.clone(),
            self.link.bus.clone(),
        );
        Producer { core, chan }
    }
}

/// Disposable publishing handle.
pub struct Producer {
    core: Arc<ProducerCore>,
    chan: Arc<ChannelSupervisor>,
}

impl Producer {
    /// Identity of the producer core (log correlation).
    pub fn ident(&self) -> Ident {
        self.core.ident()
    }

    /// Publishes a message; resolves per the confirm contract.
    pub async fn publish(
        &self,
        msg: OutboundMessage,
        cancel: CancellationToken,
    ) -> Result<(), PublishError> {
        self.core.publish(msg, cancel).await
    }

    /// Disposes the channel, then fails everything still queued.
    pub async fn dispose(&self) {
        self.chan.dispose().await;
        self.core.shutdown();
    }
}

/// Builds a [`Consumer`].
pub struct ConsumerBuilder<'a> {
    link: &'a Link,
    source: Option<QueueSource>,
    handler: Option<HandlerRef>,
    prefetch: Option<u16>,
    auto_ack: bool,
    requeue_on_error: bool,
    exclusive: bool,
}

impl ConsumerBuilder<'_> {
    /// Consume from an existing queue.
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.source = Some(QueueSource::Named(name.into()));
        self
    }

    /// Declare topology on every activation; the callback returns the queue
    /// to consume from.
    pub fn with_topology(mut self, map: ConsumerTopologyMap) -> Self {
        self.source = Some(QueueSource::Map(map));
        self
    }

    /// The delivery handler.
    pub fn handler(mut self, handler: HandlerRef) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Overrides the configured prefetch count.
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    /// Consume with `no-ack`; deliveries are settled on dispatch.
    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Whether a failed handler nacks with requeue (default) or without.
    pub fn requeue_on_error(mut self, requeue: bool) -> Self {
        self.requeue_on_error = requeue;
        self
    }

    /// Request exclusive consumption.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Builds the consumer and starts its channel.
    pub fn start(self) -> Result<Consumer, ConfigError> {
        let source = self
            .source
            .ok_or_else(|| ConfigError::invalid("queue", "consumer needs a queue or topology"))?;
        let handler = self
            .handler
            .ok_or_else(|| ConfigError::invalid("handler", "consumer needs a handler"))?;
        let prefetch = self.prefetch.unwrap_or(self.link.cfg.prefetch);

        let core = ConsumerCore::new(
            Arc::clone(&self.link.cfg),
            source,
            handler,
            prefetch,
            self.auto_ack,
            self.requeue_on_error,
            self.exclusive,
            self.link.bus.clone(),
        );
        let chan = ChannelSupervisor::spawn(
            Arc::clone(&self.link.cfg),
            Arc::clone(&self.link.conn),
            core.clone(),
            self.link.bus.clone(),
        );
        Ok(Consumer { core, chan })
    }
}

/// Disposable consuming handle.
pub struct Consumer {
    core: Arc<ConsumerCore>,
    chan: Arc<ChannelSupervisor>,
}

impl Consumer {
    /// Identity of the consumer core (log correlation).
    pub fn ident(&self) -> Ident {
        self.core.ident()
    }

    /// Stops consuming. In-flight handler results are not acknowledged.
    pub async fn dispose(&self) {
        self.chan.dispose().await;
    }
}

/// Builds a [`Topology`] or [`OnceTopology`].
pub struct TopologyBuilder<'a> {
    link: &'a Link,
    ready_hook: Option<ReadyHook>,
    error_hook: Option<ErrorHook>,
}

impl TopologyBuilder<'_> {
    /// Hook fired after every successful declaration pass.
    pub fn on_ready(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.ready_hook = Some(Arc::new(hook));
        self
    }

    /// Hook fired after every failed declaration pass.
    pub fn on_error(mut self, hook: impl Fn(&TopologyError) + Send + Sync + 'static) -> Self {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Re-declares on every channel activation until disposed.
    pub fn persistent(self, map: TopologyMap) -> Topology {
        let (runner, _) = TopologyRunner::new(
            Arc::clone(&self.link.cfg),
            TopologyMode::Persistent,
            map,
            self.ready_hook,
            self.error_hook,
            self.link.bus.clone(),
        );
        let chan = ChannelSupervisor::spawn(
            Arc::clone(&self.link.cfg),
            Arc::clone(&self.link.conn),
            runner.clone(),
            self.link.bus.clone(),
        );
        spawn_self_dispose_watch(&runner, &chan);
        Topology { chan }
    }

    /// Declares exactly once; the handle's `wait` resolves with the outcome.
    pub fn once(self, map: TopologyMap) -> OnceTopology {
        let (runner, waiter) = TopologyRunner::new(
            Arc::clone(&self.link.cfg),
            TopologyMode::Once,
            map,
            self.ready_hook,
            self.error_hook,
            self.link.bus.clone(),
        );
        let chan = ChannelSupervisor::spawn(
            Arc::clone(&self.link.cfg),
            Arc::clone(&self.link.conn),
            runner.clone(),
            self.link.bus.clone(),
        );
        spawn_self_dispose_watch(&runner, &chan);
        OnceTopology {
            chan,
            waiter: waiter.unwrap_or_else(|| oneshot::channel().1),
        }
    }
}

/// Disposes the channel once the runner asks for it (once-mode success or
/// rejection), or stands down when the channel disposes first.
fn spawn_self_dispose_watch(runner: &Arc<TopologyRunner>, chan: &Arc<ChannelSupervisor>) {
    let token = runner.self_dispose_token().clone();
    let chan_token = chan.dispose_token().clone();
    let chan = Arc::clone(chan);
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => chan.dispose().await,
            _ = chan_token.cancelled() => {}
        }
    });
}

/// Persistent topology handle.
pub struct Topology {
    chan: Arc<ChannelSupervisor>,
}

impl Topology {
    /// Stops re-declaring.
    pub async fn dispose(&self) {
        self.chan.dispose().await;
    }
}

/// One-shot topology handle.
pub struct OnceTopology {
    chan: Arc<ChannelSupervisor>,
    waiter: oneshot::Receiver<Result<(), TopologyError>>,
}

impl OnceTopology {
    /// Waits for the single declaration pass, then disposes the channel.
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<(), TopologyError> {
        let outcome = tokio::select! {
            res = &mut self.waiter => match res {
                Ok(outcome) => outcome,
                Err(_) => Err(TopologyError::Disposed),
            },
            _ = cancel.cancelled() => Err(TopologyError::Canceled),
        };
        self.chan.dispose().await;
        outcome
    }
}
