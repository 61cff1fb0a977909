//! Publishing pipeline: message model and the per-channel producer core.

mod core;
mod message;

pub(crate) use self::core::ProducerCore;
pub use message::{OutboundMessage, PublishItem};
