//! # ConsumerCore: the delivery loop of one channel.
//!
//! On each activation: resolve the queue (named or via topology callback),
//! set QoS, start the consumer, then pump deliveries through a single
//! handler invoker. Acknowledgements are guarded by channel generation -
//! a decision that outlives its channel is dropped silently, the broker
//! redelivers via channel close.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{ActiveChannel, ChannelHandler};
use crate::config::LinkConfig;
use crate::consumer::delivery::{AckDecision, Delivery};
use crate::consumer::handler::HandlerRef;
use crate::events::{Bus, Event, EventKind};
use crate::id::Ident;
use crate::topology::{ConsumerTopologyMap, TopologyOps};
use crate::transport::Deliver;
use crate::work::{QueueEntry, WorkQueue};

/// Where the consumer's queue name comes from.
pub(crate) enum QueueSource {
    Named(String),
    Map(ConsumerTopologyMap),
}

struct DeliveryEntry(Deliver);

impl QueueEntry for DeliveryEntry {}

/// Per-channel delivery loop with prefetch and generation-guarded acks.
pub(crate) struct ConsumerCore {
    ident: Ident,
    cfg: Arc<LinkConfig>,
    bus: Bus,
    source: QueueSource,
    handler: HandlerRef,
    prefetch: u16,
    auto_ack: bool,
    requeue_on_error: bool,
    exclusive: bool,
    /// Delivery queue of the current activation; `None` between channels.
    slot: Mutex<Option<Arc<WorkQueue<DeliveryEntry>>>>,
}

impl ConsumerCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cfg: Arc<LinkConfig>,
        source: QueueSource,
        handler: HandlerRef,
        prefetch: u16,
        auto_ack: bool,
        requeue_on_error: bool,
        exclusive: bool,
        bus: Bus,
    ) -> Arc<Self> {
        Arc::new(Self {
            ident: Ident::next("consumer"),
            cfg,
            bus,
            source,
            handler,
            prefetch,
            auto_ack,
            requeue_on_error,
            exclusive,
            slot: Mutex::new(None),
        })
    }

    pub(crate) fn ident(&self) -> Ident {
        self.ident
    }

    async fn resolve_queue(
        &self,
        channel: &ActiveChannel,
        cancel: &CancellationToken,
    ) -> Option<String> {
        match &self.source {
            QueueSource::Named(name) => Some(name.clone()),
            QueueSource::Map(map) => match (map)(TopologyOps::new(channel.clone())).await {
                Ok(queue) => Some(queue),
                Err(e) => {
                    warn!(ident = %self.ident, error = %e, "consumer topology failed");
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
                    None
                }
            },
        }
    }
}

#[async_trait]
impl ChannelHandler for ConsumerCore {
    async fn on_active(&self, channel: ActiveChannel, cancel: CancellationToken) {
        let Some(queue) = self.resolve_queue(&channel, &cancel).await else {
            return;
        };

        if !self.auto_ack {
            if let Err(e) = channel.model.basic_qos(self.prefetch).await {
                warn!(ident = %self.ident, error = %e, "qos failed");
                return;
            }
        }

        let deliveries = Arc::new(WorkQueue::new());
        *self.slot.lock().unwrap() = Some(Arc::clone(&deliveries));

        let requested_tag = self.ident.to_string();
        let consumer_tag = match channel
            .model
            .basic_consume(&queue, &requested_tag, self.auto_ack, self.exclusive)
            .await
        {
            Ok(tag) => tag,
            Err(e) => {
                warn!(ident = %self.ident, error = %e, "consume failed");
                self.slot.lock().unwrap().take();
                return;
            }
        };

        info!(
            ident = %self.ident,
            queue = %queue,
            consumer_tag = %consumer_tag,
            generation = channel.generation,
            "consuming"
        );
        self.bus
            .publish(Event::now(EventKind::ConsumerStarted).with_component(self.ident));

        while let Some(DeliveryEntry(raw)) = deliveries.take(&cancel).await {
            let from_this_app = !self.cfg.app_id.is_empty()
                && raw.properties.app_id.as_deref() == Some(self.cfg.app_id.as_str());
            let delivery = Delivery {
                tag: raw.delivery_tag,
                generation: channel.generation,
                redelivered: raw.redelivered,
                exchange: raw.exchange,
                routing_key: raw.routing_key,
                queue: queue.clone(),
                consumer_tag: consumer_tag.clone(),
                properties: raw.properties,
                body: raw.body,
                from_this_app,
            };
            let tag = delivery.tag;
            let generation = delivery.generation;

            if self.auto_ack {
                // no_ack consume: the broker already considers it settled.
                if let Err(e) = self.handler.handle(delivery, cancel.child_token()).await {
                    warn!(ident = %self.ident, error = %e, "handler failed");
                }
                continue;
            }

            let decision = match self.handler.handle(delivery, cancel.child_token()).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(ident = %self.ident, error = %e, "handler failed");
                    AckDecision::Nack {
                        requeue: self.requeue_on_error,
                    }
                }
            };

            if cancel.is_cancelled() {
                break;
            }
            if generation != channel.generation {
                debug!(ident = %self.ident, tag, "dropping stale acknowledgement");
                continue;
            }

            let sent = match decision {
                AckDecision::Ack => channel.model.basic_ack(tag, false).await,
                AckDecision::Nack { requeue } => {
                    channel.model.basic_nack(tag, false, requeue).await
                }
                AckDecision::Reject { requeue } => channel.model.basic_reject(tag, requeue).await,
            };
            if let Err(e) = sent {
                warn!(ident = %self.ident, error = %e, "acknowledgement failed");
                break;
            }
        }

        self.slot.lock().unwrap().take();
    }

    fn on_deliver(&self, deliver: Deliver) {
        let queue = self.slot.lock().unwrap().clone();
        if let Some(q) = queue {
            q.put(DeliveryEntry(deliver));
        }
    }
}
