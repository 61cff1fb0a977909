//! In-memory broker implementing the transport contracts.
//!
//! Supports the fault injection the recovery tests need: refused connects,
//! peer connection drops, channel faults, declaration rejections, paused
//! confirms, nacks, unroutable returns, and per-consumer prefetch
//! bookkeeping. Not a wire codec; purely a test double.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::{
    Arguments, CloseInitiator, CloseReason, Connect, ConnectFactory, ConnectionEvent, Deliver,
    ExchangeKind, ExchangeSpec, MessageProperties, Model, ModelEvent, PublishArgs, QueueDeclareOk,
    QueueSpec,
};

/// A publish observed by the broker.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub channel_id: u64,
    pub tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub message_id: Option<String>,
    pub body: Vec<u8>,
}

/// A consumer acknowledgement observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub channel_id: u64,
    pub delivery_tag: u64,
    pub kind: AckKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nack { requeue: bool },
    Reject { requeue: bool },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    properties: MessageProperties,
    body: Vec<u8>,
    redelivered: bool,
}

struct ConsumerReg {
    tag: String,
    no_ack: bool,
    model: Arc<ModelShared>,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    bindings: Vec<(String, String)>,
    consumers: Vec<ConsumerReg>,
}

struct ExchangeRecord {
    kind: ExchangeKind,
}

struct ConnShared {
    id: u64,
    open: AtomicBool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

struct ModelShared {
    conn_id: u64,
    channel_id: u64,
    open: AtomicBool,
    confirm: AtomicBool,
    publish_seq: AtomicU64,
    delivery_seq: AtomicU64,
    prefetch: AtomicU16,
    unacked: Mutex<Vec<(u64, String, StoredMessage)>>,
    events: mpsc::UnboundedSender<ModelEvent>,
}

#[derive(Default)]
struct BrokerState {
    connect_failures: u32,
    connect_attempts: u64,
    next_conn_id: u64,
    next_channel_id: u64,
    next_generated_queue: u64,
    current_conn: Option<Arc<ConnShared>>,
    models: Vec<Arc<ModelShared>>,
    exchanges: HashMap<String, ExchangeRecord>,
    queues: HashMap<String, QueueState>,
    declare_rejections: VecDeque<(u16, String)>,
    nack_next: u32,
    confirms_paused_after: Option<u64>,
    publish_total: u64,
    publishes: Vec<PublishRecord>,
    confirm_acks: Vec<(u64, u64)>,
    consumer_acks: Vec<AckRecord>,
    declare_counts: HashMap<String, u32>,
}

/// Scriptable in-memory broker.
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
        })
    }

    /// A factory opening connections against this broker.
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ConnectFactory> {
        Arc::new(FakeFactory {
            broker: Arc::clone(self),
        })
    }

    // --- fault injection -------------------------------------------------

    /// Refuse the next `n` connection attempts.
    pub fn fail_connects(&self, n: u32) {
        self.state.lock().unwrap().connect_failures = n;
    }

    /// Drop the live connection, peer-initiated.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(conn) = state.current_conn.take() {
            conn.open.store(false, Ordering::SeqCst);
            let conn_id = conn.id;
            Self::close_models_of(&mut state, Some(conn_id));
            let _ = conn.events.send(ConnectionEvent::Shutdown(CloseReason::new(
                CloseInitiator::Peer,
                320,
                "CONNECTION_FORCED - broker shut down",
            )));
        }
    }

    /// Fault the most recent open channel, peer-initiated.
    pub fn fail_channel(&self) {
        let mut state = self.state.lock().unwrap();
        let model = state
            .models
            .iter()
            .rev()
            .find(|m| m.open.load(Ordering::SeqCst))
            .cloned();
        if let Some(model) = model {
            model.open.store(false, Ordering::SeqCst);
            Self::requeue_unacked(&mut state, &model);
            let _ = model.events.send(ModelEvent::Shutdown(CloseReason::new(
                CloseInitiator::Peer,
                541,
                "INTERNAL_ERROR - channel fault",
            )));
        }
    }

    /// Reject the next declaration with the given AMQP code.
    pub fn reject_next_declare(&self, code: u16, text: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .declare_rejections
            .push_back((code, text.into()));
    }

    /// Nack the next `n` confirmed publishes.
    pub fn nack_next_publishes(&self, n: u32) {
        self.state.lock().unwrap().nack_next = n;
    }

    /// Stop confirming once `n` publishes have been seen in total.
    pub fn pause_confirms_after(&self, n: u64) {
        self.state.lock().unwrap().confirms_paused_after = Some(n);
    }

    /// Resume confirming.
    pub fn resume_confirms(&self) {
        self.state.lock().unwrap().confirms_paused_after = None;
    }

    // --- seeding and assertions ------------------------------------------

    /// Create a queue directly (without a declare from a client).
    pub fn seed_queue(&self, name: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(name.into())
            .or_default();
    }

    /// Push a message straight into a queue and deliver it.
    pub fn publish_to_queue(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        let msg = StoredMessage {
            exchange: String::new(),
            routing_key: queue.to_string(),
            properties: MessageProperties::default(),
            body: body.into(),
            redelivered: false,
        };
        if let Some(q) = state.queues.get_mut(queue) {
            q.messages.push_back(msg);
        }
        Self::pump_queue(&mut state, queue);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().queues.contains_key(name)
    }

    pub fn exchange_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().exchanges.contains_key(name)
    }

    /// How many times the named object was declared.
    pub fn declare_count(&self, name: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .declare_counts
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn queue_len(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.state.lock().unwrap().publishes.clone()
    }

    /// `(channel_id, tag)` pairs for every positive publisher confirm sent.
    pub fn confirm_acks(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().confirm_acks.clone()
    }

    pub fn consumer_acks(&self) -> Vec<AckRecord> {
        self.state.lock().unwrap().consumer_acks.clone()
    }

    // --- internals --------------------------------------------------------

    fn close_models_of(state: &mut BrokerState, conn_id: Option<u64>) {
        let models: Vec<Arc<ModelShared>> = state
            .models
            .iter()
            .filter(|m| conn_id.map_or(true, |id| m.conn_id == id))
            .cloned()
            .collect();
        for model in models {
            model.open.store(false, Ordering::SeqCst);
            Self::requeue_unacked(state, &model);
        }
    }

    fn requeue_unacked(state: &mut BrokerState, model: &ModelShared) {
        let mut unacked = {
            let mut guard = model.unacked.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        unacked.sort_by_key(|(tag, _, _)| *tag);
        let mut touched = Vec::new();
        for (_, queue, mut msg) in unacked.into_iter().rev() {
            msg.redelivered = true;
            if let Some(q) = state.queues.get_mut(&queue) {
                q.messages.push_front(msg);
                touched.push(queue);
            }
        }
        for queue in touched {
            Self::pump_queue(state, &queue);
        }
    }

    /// Deliver ready messages to consumers with spare prefetch capacity.
    fn pump_queue(state: &mut BrokerState, queue: &str) {
        let Some(q) = state.queues.get_mut(queue) else {
            return;
        };
        q.consumers.retain(|c| c.model.open.load(Ordering::SeqCst));

        for consumer in &q.consumers {
            loop {
                if q.messages.is_empty() {
                    return;
                }
                let capacity = if consumer.no_ack {
                    usize::MAX
                } else {
                    let prefetch = consumer.model.prefetch.load(Ordering::SeqCst) as usize;
                    if prefetch == 0 {
                        usize::MAX
                    } else {
                        let outstanding = consumer.model.unacked.lock().unwrap().len();
                        prefetch.saturating_sub(outstanding)
                    }
                };
                if capacity == 0 {
                    break;
                }
                let Some(msg) = q.messages.pop_front() else {
                    return;
                };
                let tag = consumer.model.delivery_seq.fetch_add(1, Ordering::SeqCst) + 1;
                if !consumer.no_ack {
                    consumer
                        .model
                        .unacked
                        .lock()
                        .unwrap()
                        .push((tag, queue.to_string(), msg.clone()));
                }
                let _ = consumer.model.events.send(ModelEvent::Deliver(Deliver {
                    consumer_tag: consumer.tag.clone(),
                    delivery_tag: tag,
                    redelivered: msg.redelivered,
                    exchange: msg.exchange.clone(),
                    routing_key: msg.routing_key.clone(),
                    properties: msg.properties.clone(),
                    body: msg.body.clone(),
                }));
            }
        }
    }

    fn route(state: &BrokerState, exchange: &str, routing_key: &str) -> Vec<String> {
        if exchange.is_empty() {
            return if state.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            };
        }
        let Some(ex) = state.exchanges.get(exchange) else {
            return Vec::new();
        };
        state
            .queues
            .iter()
            .filter(|(_, q)| {
                q.bindings.iter().any(|(bound_ex, key)| {
                    bound_ex == exchange
                        && match ex.kind {
                            ExchangeKind::Fanout => true,
                            _ => key == routing_key,
                        }
                })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn take_rejection(
        state: &mut BrokerState,
        model: &ModelShared,
    ) -> Option<TransportError> {
        let (code, text) = state.declare_rejections.pop_front()?;
        Self::close_channel_with(state, model, code, &text);
        Some(TransportError::Rejected { code, text })
    }

    /// A failed declaration closes the channel, as the protocol does.
    fn close_channel_with(state: &mut BrokerState, model: &ModelShared, code: u16, text: &str) {
        model.open.store(false, Ordering::SeqCst);
        Self::requeue_unacked(state, model);
        let _ = model.events.send(ModelEvent::Shutdown(CloseReason::new(
            CloseInitiator::Peer,
            code,
            text,
        )));
    }
}

struct FakeFactory {
    broker: Arc<FakeBroker>,
}

#[async_trait]
impl ConnectFactory for FakeFactory {
    async fn open(
        &self,
        _url: &str,
        _connection_name: &str,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Connect>, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Connect {
                reason: "canceled".into(),
            });
        }
        let mut state = self.broker.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::Connect {
                reason: "connection refused".into(),
            });
        }
        state.next_conn_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ConnShared {
            id: state.next_conn_id,
            open: AtomicBool::new(true),
            events: tx,
        });
        state.current_conn = Some(Arc::clone(&shared));
        Ok(Box::new(FakeConnection {
            broker: Arc::clone(&self.broker),
            shared,
            events_rx: Mutex::new(Some(rx)),
        }))
    }
}

struct FakeConnection {
    broker: Arc<FakeBroker>,
    shared: Arc<ConnShared>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
}

#[async_trait]
impl Connect for FakeConnection {
    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn local_port(&self) -> Option<u16> {
        Some(5672)
    }

    async fn create_model(&self) -> Result<Box<dyn Model>, TransportError> {
        let mut state = self.broker.state.lock().unwrap();
        if !self.shared.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        state.next_channel_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ModelShared {
            conn_id: self.shared.id,
            channel_id: state.next_channel_id,
            open: AtomicBool::new(true),
            confirm: AtomicBool::new(false),
            publish_seq: AtomicU64::new(0),
            delivery_seq: AtomicU64::new(0),
            prefetch: AtomicU16::new(0),
            unacked: Mutex::new(Vec::new()),
            events: tx,
        });
        state.models.push(Arc::clone(&shared));
        Ok(Box::new(FakeModel {
            broker: Arc::clone(&self.broker),
            shared,
            events_rx: Mutex::new(Some(rx)),
        }))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self, _reason: CloseReason) {
        let mut state = self.broker.state.lock().unwrap();
        if self.shared.open.swap(false, Ordering::SeqCst) {
            FakeBroker::close_models_of(&mut state, Some(self.shared.id));
            if state
                .current_conn
                .as_ref()
                .is_some_and(|c| c.id == self.shared.id)
            {
                state.current_conn = None;
            }
        }
    }
}

struct FakeModel {
    broker: Arc<FakeBroker>,
    shared: Arc<ModelShared>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ModelEvent>>>,
}

impl FakeModel {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed)
        }
    }

    fn bump_declare(state: &mut BrokerState, name: &str) {
        *state.declare_counts.entry(name.to_string()).or_insert(0) += 1;
    }
}

#[async_trait]
impl Model for FakeModel {
    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ModelEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn exchange_declare(&self, spec: &ExchangeSpec) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        if let Some(err) = FakeBroker::take_rejection(&mut state, &self.shared) {
            return Err(err);
        }
        if spec.passive {
            if !state.exchanges.contains_key(&spec.name) {
                let text = format!("NOT_FOUND - no exchange '{}'", spec.name);
                FakeBroker::close_channel_with(&mut state, &self.shared, 404, &text);
                return Err(TransportError::Rejected { code: 404, text });
            }
            return Ok(());
        }
        Self::bump_declare(&mut state, &spec.name);
        state
            .exchanges
            .insert(spec.name.clone(), ExchangeRecord { kind: spec.kind });
        Ok(())
    }

    async fn exchange_delete(&self, name: &str, _if_unused: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.broker.state.lock().unwrap().exchanges.remove(name);
        Ok(())
    }

    async fn queue_declare(&self, spec: &QueueSpec) -> Result<QueueDeclareOk, TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        if let Some(err) = FakeBroker::take_rejection(&mut state, &self.shared) {
            return Err(err);
        }
        if spec.passive {
            return match state.queues.get(&spec.name) {
                Some(q) => Ok(QueueDeclareOk {
                    name: spec.name.clone(),
                    message_count: q.messages.len() as u32,
                    consumer_count: q.consumers.len() as u32,
                }),
                None => {
                    let text = format!("NOT_FOUND - no queue '{}'", spec.name);
                    FakeBroker::close_channel_with(&mut state, &self.shared, 404, &text);
                    Err(TransportError::Rejected { code: 404, text })
                }
            };
        }
        let name = if spec.name.is_empty() {
            state.next_generated_queue += 1;
            format!("amq.gen-{}", state.next_generated_queue)
        } else {
            spec.name.clone()
        };
        Self::bump_declare(&mut state, &name);
        let q = state.queues.entry(name.clone()).or_default();
        Ok(QueueDeclareOk {
            name,
            message_count: q.messages.len() as u32,
            consumer_count: q.consumers.len() as u32,
        })
    }

    async fn queue_delete(
        &self,
        name: &str,
        _if_unused: bool,
        _if_empty: bool,
    ) -> Result<u32, TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        let removed = state
            .queues
            .remove(name)
            .map(|q| q.messages.len() as u32)
            .unwrap_or(0);
        Ok(removed)
    }

    async fn queue_purge(&self, name: &str) -> Result<u32, TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        match state.queues.get_mut(name) {
            Some(q) => {
                let n = q.messages.len() as u32;
                q.messages.clear();
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: &Arguments,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        if !state.exchanges.contains_key(exchange) {
            let text = format!("NOT_FOUND - no exchange '{exchange}'");
            FakeBroker::close_channel_with(&mut state, &self.shared, 404, &text);
            return Err(TransportError::Rejected { code: 404, text });
        }
        match state.queues.get_mut(queue) {
            Some(q) => {
                q.bindings
                    .push((exchange.to_string(), routing_key.to_string()));
                Ok(())
            }
            None => {
                let text = format!("NOT_FOUND - no queue '{queue}'");
                FakeBroker::close_channel_with(&mut state, &self.shared, 404, &text);
                Err(TransportError::Rejected { code: 404, text })
            }
        }
    }

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: &Arguments,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        if let Some(q) = state.queues.get_mut(queue) {
            q.bindings
                .retain(|(ex, key)| !(ex == exchange && key == routing_key));
        }
        Ok(())
    }

    async fn confirm_select(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.confirm.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn basic_qos(&self, prefetch: u16) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.prefetch.store(prefetch, Ordering::SeqCst);
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
        _exclusive: bool,
    ) -> Result<String, TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        if !state.queues.contains_key(queue) {
            let text = format!("NOT_FOUND - no queue '{queue}'");
            FakeBroker::close_channel_with(&mut state, &self.shared, 404, &text);
            return Err(TransportError::Rejected { code: 404, text });
        }
        let tag = if consumer_tag.is_empty() {
            format!("ctag-{}.{}", self.shared.conn_id, self.shared.channel_id)
        } else {
            consumer_tag.to_string()
        };
        if let Some(q) = state.queues.get_mut(queue) {
            q.consumers.push(ConsumerReg {
                tag: tag.clone(),
                no_ack,
                model: Arc::clone(&self.shared),
            });
        }
        FakeBroker::pump_queue(&mut state, queue);
        Ok(tag)
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        for q in state.queues.values_mut() {
            q.consumers
                .retain(|c| !(c.tag == consumer_tag && c.model.channel_id == self.shared.channel_id));
        }
        Ok(())
    }

    async fn basic_publish(
        &self,
        args: &PublishArgs,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<u64, TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        let tag = self.shared.publish_seq.fetch_add(1, Ordering::SeqCst) + 1;
        state.publish_total += 1;
        let publish_total = state.publish_total;
        state.publishes.push(PublishRecord {
            channel_id: self.shared.channel_id,
            tag,
            exchange: args.exchange.clone(),
            routing_key: args.routing_key.clone(),
            message_id: properties.message_id.clone(),
            body: body.to_vec(),
        });

        let targets = FakeBroker::route(&state, &args.exchange, &args.routing_key);
        let routed = !targets.is_empty();
        for queue in &targets {
            let msg = StoredMessage {
                exchange: args.exchange.clone(),
                routing_key: args.routing_key.clone(),
                properties: properties.clone(),
                body: body.to_vec(),
                redelivered: false,
            };
            if let Some(q) = state.queues.get_mut(queue) {
                q.messages.push_back(msg);
            }
        }
        for queue in &targets {
            FakeBroker::pump_queue(&mut state, queue);
        }

        if self.shared.confirm.load(Ordering::SeqCst) {
            if args.mandatory && !routed {
                // basic.return first, then the ack for the same tag.
                let _ = self.shared.events.send(ModelEvent::Return {
                    reply_code: 312,
                    reply_text: "NO_ROUTE".into(),
                    exchange: args.exchange.clone(),
                    routing_key: args.routing_key.clone(),
                    properties: properties.clone(),
                    body: body.to_vec(),
                });
                let _ = self.shared.events.send(ModelEvent::Ack {
                    delivery_tag: tag,
                    multiple: false,
                });
            } else if state.nack_next > 0 {
                state.nack_next -= 1;
                let _ = self.shared.events.send(ModelEvent::Nack {
                    delivery_tag: tag,
                    multiple: false,
                    requeue: false,
                });
            } else if state
                .confirms_paused_after
                .is_some_and(|n| publish_total > n)
            {
                // Confirm withheld; the message is lost with the channel.
            } else {
                state.confirm_acks.push((self.shared.channel_id, tag));
                let _ = self.shared.events.send(ModelEvent::Ack {
                    delivery_tag: tag,
                    multiple: false,
                });
            }
        }
        Ok(tag)
    }

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        state.consumer_acks.push(AckRecord {
            channel_id: self.shared.channel_id,
            delivery_tag,
            kind: AckKind::Ack,
        });
        let touched = {
            let mut unacked = self.shared.unacked.lock().unwrap();
            let mut touched = Vec::new();
            unacked.retain(|(tag, queue, _)| {
                let hit = if multiple {
                    *tag <= delivery_tag
                } else {
                    *tag == delivery_tag
                };
                if hit {
                    touched.push(queue.clone());
                }
                !hit
            });
            touched
        };
        for queue in touched {
            FakeBroker::pump_queue(&mut state, &queue);
        }
        Ok(())
    }

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        state.consumer_acks.push(AckRecord {
            channel_id: self.shared.channel_id,
            delivery_tag,
            kind: AckKind::Nack { requeue },
        });
        let dropped = {
            let mut unacked = self.shared.unacked.lock().unwrap();
            let mut dropped = Vec::new();
            unacked.retain(|(tag, queue, msg)| {
                let hit = if multiple {
                    *tag <= delivery_tag
                } else {
                    *tag == delivery_tag
                };
                if hit {
                    dropped.push((queue.clone(), msg.clone()));
                }
                !hit
            });
            dropped
        };
        for (queue, mut msg) in dropped {
            if requeue {
                msg.redelivered = true;
                if let Some(q) = state.queues.get_mut(&queue) {
                    q.messages.push_front(msg);
                }
            }
            FakeBroker::pump_queue(&mut state, &queue);
        }
        Ok(())
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock().unwrap();
        state.consumer_acks.push(AckRecord {
            channel_id: self.shared.channel_id,
            delivery_tag,
            kind: AckKind::Reject { requeue },
        });
        let dropped = {
            let mut unacked = self.shared.unacked.lock().unwrap();
            let mut dropped = Vec::new();
            unacked.retain(|(tag, queue, msg)| {
                if *tag == delivery_tag {
                    dropped.push((queue.clone(), msg.clone()));
                    false
                } else {
                    true
                }
            });
            dropped
        };
        for (queue, mut msg) in dropped {
            if requeue {
                msg.redelivered = true;
                if let Some(q) = state.queues.get_mut(&queue) {
                    q.messages.push_front(msg);
                }
            }
            FakeBroker::pump_queue(&mut state, &queue);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.broker.state.lock().unwrap();
        if self.shared.open.swap(false, Ordering::SeqCst) {
            FakeBroker::requeue_unacked(&mut state, &self.shared);
        }
        Ok(())
    }
}
