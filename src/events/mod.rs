//! Lifecycle events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the connection, channel,
//! topology, producer and consumer supervisors.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] - event classification and payload metadata
//! - [`Bus`] - thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `ConnectionSupervisor`, `ChannelSupervisor`,
//!   `TopologyRunner`, `ProducerCore`, `ConsumerCore`.
//! - **Consumers**: the `SubscriberSet` listener wired by
//!   [`LinkBuilder`](crate::LinkBuilder), plus any raw receiver obtained via
//!   [`Link::subscribe`](crate::Link::subscribe).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
