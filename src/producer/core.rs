//! # ProducerCore: the publishing pipeline of one channel.
//!
//! ```text
//! publish() ──► [AutoCancellingQueue]──┐
//!                                      ├─► serial pump ──► basic_publish ──► broker
//! broker confirms ──► [confirm queue]──┘         │
//!                                                └─► confirm map ──► settle promise
//! ```
//!
//! ## Rules
//! - A publish promise resolves only on the broker's positive confirm (or
//!   immediately when confirm mode is off).
//! - Messages dispatched on a channel that dies before their confirm are
//!   re-queued **at the head** in tag order; the user-visible promise stays
//!   the same object across generations.
//! - Confirms with `multiple` settle every pending tag up to and including
//!   the tag. Returns match by message id and win over the follow-up ack.
//! - Backpressure: publishers suspend on the soft ceiling until the
//!   pipeline drains, their cancellation fires, or the producer disposes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::channel::{ActiveChannel, ChannelHandler, ReturnedMessage};
use crate::config::LinkConfig;
use crate::error::PublishError;
use crate::events::{Bus, Event, EventKind};
use crate::id::Ident;
use crate::producer::message::{OutboundMessage, PublishItem};
use crate::topology::{TopologyMap, TopologyOps};
use crate::work::{
    AutoCancellingQueue, CompositeWorkQueue, QueueEntry, WorkItem, WorkQueue,
};

/// A broker confirm observed by the pump.
#[derive(Debug, Clone)]
enum ConfirmEvent {
    Ack {
        tag: u64,
        multiple: bool,
    },
    Nack {
        tag: u64,
        multiple: bool,
    },
    Return {
        message_id: Option<String>,
        code: u16,
        text: String,
    },
}

/// Union of the two streams multiplexed into the serial pump.
#[derive(Clone)]
enum ProducerWork {
    Publish(Arc<PublishItem>),
    Confirm(ConfirmEvent),
}

impl QueueEntry for ProducerWork {
    fn claim(&self) -> bool {
        match self {
            ProducerWork::Publish(item) => QueueEntry::claim(item),
            ProducerWork::Confirm(_) => true,
        }
    }

    fn cancellation(&self) -> Option<CancellationToken> {
        match self {
            ProducerWork::Publish(item) => QueueEntry::cancellation(item),
            ProducerWork::Confirm(_) => None,
        }
    }

    fn cancel_pending(&self) {
        if let ProducerWork::Publish(item) = self {
            QueueEntry::cancel_pending(item);
        }
    }

    fn done_signal(&self) -> Option<CancellationToken> {
        match self {
            ProducerWork::Publish(item) => QueueEntry::done_signal(item),
            ProducerWork::Confirm(_) => None,
        }
    }

    fn release(&self) {
        if let ProducerWork::Publish(item) = self {
            QueueEntry::release(item);
        }
    }
}

/// Per-channel publishing pipeline with confirms, retries and backpressure.
pub(crate) struct ProducerCore {
    ident: Ident,
    cfg: Arc<LinkConfig>,
    bus: Bus,
    topology: Option<TopologyMap>,
    publish_q: AutoCancellingQueue<ProducerWork>,
    confirm_q: Arc<WorkQueue<ProducerWork>>,
    pump: CompositeWorkQueue<ProducerWork>,
    limit: Option<Arc<Semaphore>>,
    disposed: AtomicBool,
}

impl ProducerCore {
    pub(crate) fn new(cfg: Arc<LinkConfig>, topology: Option<TopologyMap>, bus: Bus) -> Arc<Self> {
        let publish_q = AutoCancellingQueue::new();
        let confirm_q = Arc::new(WorkQueue::new());
        let pump = CompositeWorkQueue::new(vec![publish_q.source(), Arc::clone(&confirm_q)]);
        let limit = (cfg.publish_queue_limit > 0)
            .then(|| Arc::new(Semaphore::new(cfg.publish_queue_limit)));

        Arc::new(Self {
            ident: Ident::next("producer"),
            cfg,
            bus,
            topology,
            publish_q,
            confirm_q,
            pump,
            limit,
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn ident(&self) -> Ident {
        self.ident
    }

    /// Enqueues a message and waits for its terminal outcome.
    pub(crate) async fn publish(
        &self,
        mut msg: OutboundMessage,
        cancel: CancellationToken,
    ) -> Result<(), PublishError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PublishError::Disposed);
        }

        msg.permit = match &self.limit {
            Some(sem) => {
                tokio::select! {
                    permit = Arc::clone(sem).acquire_owned() => match permit {
                        Ok(p) => Some(p),
                        Err(_) => return Err(PublishError::Disposed),
                    },
                    _ = cancel.cancelled() => return Err(PublishError::Canceled),
                }
            }
            None => None,
        };

        // The message id is the return-correlation key; assign one if the
        // caller did not.
        if msg.properties.message_id.is_none() {
            msg.properties.message_id = Some(Uuid::new_v4().to_string());
        }
        if msg.properties.app_id.is_none() && !self.cfg.app_id.is_empty() {
            msg.properties.app_id = Some(self.cfg.app_id.clone());
        }

        let (item, promise) = WorkItem::new(msg, cancel);

        if self.cfg.confirm_mode {
            if let Some(deadline) = self.cfg.confirm_deadline() {
                let it = Arc::clone(&item);
                let done = item.done_token().clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(deadline) => {
                            it.fail(PublishError::ConfirmTimeout { timeout: deadline });
                        }
                        _ = done.cancelled() => {}
                    }
                });
            }
        }

        if self.disposed.load(Ordering::SeqCst) {
            item.fail(PublishError::Disposed);
        } else {
            self.publish_q.put(ProducerWork::Publish(item));
        }

        promise.wait().await.into_result(PublishError::Canceled)
    }

    /// Fails everything still queued. Called by the owner after the channel
    /// supervisor is disposed.
    pub(crate) fn shutdown(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        for work in self.publish_q.drain() {
            if let ProducerWork::Publish(item) = work {
                item.fail(PublishError::Disposed);
            }
        }
        self.confirm_q.drain();
    }

    fn apply_confirm(&self, ev: ConfirmEvent, pending: &mut BTreeMap<u64, Arc<PublishItem>>) {
        match ev {
            ConfirmEvent::Ack { tag, multiple } => {
                if multiple {
                    let tags: Vec<u64> = pending.range(..=tag).map(|(k, _)| *k).collect();
                    for t in tags {
                        if let Some(item) = pending.remove(&t) {
                            item.succeed(());
                        }
                    }
                } else if let Some(item) = pending.remove(&tag) {
                    item.succeed(());
                }
            }
            ConfirmEvent::Nack { tag, multiple } => {
                if multiple {
                    let tags: Vec<u64> = pending.range(..=tag).map(|(k, _)| *k).collect();
                    for t in tags {
                        if let Some(item) = pending.remove(&t) {
                            item.fail(PublishError::Nacked);
                        }
                    }
                } else if let Some(item) = pending.remove(&tag) {
                    item.fail(PublishError::Nacked);
                }
            }
            ConfirmEvent::Return {
                message_id,
                code,
                text,
            } => {
                let matched = pending
                    .iter()
                    .find(|(_, item)| item.payload().properties.message_id == message_id)
                    .map(|(tag, _)| *tag);
                match matched {
                    Some(tag) => {
                        if let Some(item) = pending.remove(&tag) {
                            item.fail(PublishError::Returned { code, text });
                        }
                    }
                    None => {
                        debug!(ident = %self.ident, ?message_id, "return without pending match");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ChannelHandler for ProducerCore {
    async fn on_active(&self, channel: ActiveChannel, cancel: CancellationToken) {
        if self.cfg.confirm_mode {
            if let Err(e) = channel.model.confirm_select().await {
                warn!(ident = %self.ident, error = %e, "confirm select failed");
                return;
            }
        }

        if let Some(map) = &self.topology {
            if let Err(e) = (map)(TopologyOps::new(channel.clone())).await {
                warn!(ident = %self.ident, error = %e, "producer topology failed");
                self.bus.publish(
                    Event::now(EventKind::TopologyFailed)
                        .with_component(self.ident)
                        .with_error(e.to_string()),
                );
                if e.is_rejection() {
                    tokio::select! {
                        _ = tokio::time::sleep(self.cfg.topology_recovery_interval) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                return;
            }
        }

        // Confirms left over from the previous generation would collide with
        // this channel's tag space.
        self.confirm_q.drain();

        let mut pending: BTreeMap<u64, Arc<PublishItem>> = BTreeMap::new();

        while let Some(work) = self.pump.take(&cancel).await {
            match work {
                ProducerWork::Publish(item) => {
                    let payload = item.payload();
                    let dispatched = channel
                        .model
                        .basic_publish(&payload.publish, &payload.properties, &payload.body)
                        .await;
                    match dispatched {
                        Ok(seq) => {
                            trace!(ident = %self.ident, seq, "published");
                            if self.cfg.confirm_mode {
                                pending.insert(seq, item);
                            } else {
                                item.succeed(());
                            }
                        }
                        Err(e) => {
                            warn!(ident = %self.ident, error = %e, "publish failed");
                            self.publish_q.put_retry(vec![ProducerWork::Publish(item)]);
                            break;
                        }
                    }
                }
                ProducerWork::Confirm(ev) => self.apply_confirm(ev, &mut pending),
            }
        }

        // The channel is going away: unconfirmed messages move back to the
        // head for the next generation, still bound to their promises.
        let leftovers: Vec<ProducerWork> = pending
            .into_values()
            .filter(|item| !item.is_settled())
            .map(ProducerWork::Publish)
            .collect();
        if !leftovers.is_empty() {
            info!(
                ident = %self.ident,
                count = leftovers.len(),
                generation = channel.generation,
                "re-queueing unconfirmed publishes"
            );
            self.bus.publish(
                Event::now(EventKind::PublishesRequeued)
                    .with_component(self.ident)
                    .with_count(leftovers.len() as u64),
            );
            self.publish_q.put_retry(leftovers);
        }
    }

    fn on_ack(&self, delivery_tag: u64, multiple: bool) {
        self.confirm_q.put(ProducerWork::Confirm(ConfirmEvent::Ack {
            tag: delivery_tag,
            multiple,
        }));
    }

    fn on_nack(&self, delivery_tag: u64, multiple: bool, _requeue: bool) {
        self.confirm_q.put(ProducerWork::Confirm(ConfirmEvent::Nack {
            tag: delivery_tag,
            multiple,
        }));
    }

    fn on_return(&self, message: ReturnedMessage) {
        self.confirm_q
            .put(ProducerWork::Confirm(ConfirmEvent::Return {
                message_id: message.properties.message_id.clone(),
                code: message.reply_code,
                text: message.reply_text,
            }));
    }
}
