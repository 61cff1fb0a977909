//! # Capability interface between a channel supervisor and its component.
//!
//! A [`ChannelHandler`] is registered by the component that owns both the
//! channel supervisor and the handler (topology runner, producer core,
//! consumer core). Neither side owns the other; disposal cascades top-down
//! through the owning component.
//!
//! ## Ordering guarantee
//! Between the start of `on_active` and the cancellation of its token, every
//! broker-callback forward (`on_ack` / `on_nack` / `on_return` /
//! `on_deliver`) the handler observes belongs to the **same** model
//! instance.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::transport::{Deliver, MessageProperties, Model};

/// A live model handed to a handler, tagged with its channel generation.
#[derive(Clone)]
pub struct ActiveChannel {
    pub model: Arc<dyn Model>,
    /// Monotonic per-supervisor counter; delivery tags are only meaningful
    /// within one generation.
    pub generation: u64,
}

/// A mandatory message the broker returned as unroutable.
#[derive(Debug, Clone)]
pub struct ReturnedMessage {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// Component-side contract driven by a
/// [`ChannelSupervisor`](crate::channel::ChannelSupervisor).
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    /// Runs concurrently with model creation; canceled once the model is
    /// live or the attempt failed.
    async fn on_connecting(&self, cancel: CancellationToken) {
        let _ = cancel;
    }

    /// Drives the component while the channel is active. Must return
    /// promptly once `cancel` fires.
    async fn on_active(&self, channel: ActiveChannel, cancel: CancellationToken);

    /// Broker positive confirm, forwarded verbatim.
    fn on_ack(&self, delivery_tag: u64, multiple: bool) {
        let _ = (delivery_tag, multiple);
    }

    /// Broker negative confirm, forwarded verbatim.
    fn on_nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) {
        let _ = (delivery_tag, multiple, requeue);
    }

    /// Unroutable mandatory message, forwarded verbatim.
    fn on_return(&self, message: ReturnedMessage) {
        let _ = message;
    }

    /// Inbound delivery, forwarded verbatim.
    fn on_deliver(&self, deliver: Deliver) {
        let _ = deliver;
    }
}
