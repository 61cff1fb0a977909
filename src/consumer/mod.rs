//! Consuming: delivery model, user handler contract, per-channel core.

mod core;
mod delivery;
mod handler;

pub(crate) use self::core::{ConsumerCore, QueueSource};
pub use delivery::{AckDecision, Delivery};
pub use handler::{BoxHandleFuture, DeliveryHandler, HandlerFn, HandlerRef};
