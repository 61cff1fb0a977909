//! # Lifecycle-event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`]
//! that feeds registered observers from the [`Bus`](crate::events::Bus).
//! Each subscriber declares the event kinds it wants; dispatch filters
//! before enqueueing, and every subscriber runs behind its own bounded
//! lane so none of them can slow the supervisors down.
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use amqpvisor::{Subscribe, Event, EventKind};
//! use async_trait::async_trait;
//!
//! struct DisconnectCounter;
//!
//! #[async_trait]
//! impl Subscribe for DisconnectCounter {
//!     async fn on_event(&self, _event: &Event) {
//!         // increment a gauge, page someone, ...
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "disconnect-counter"
//!     }
//!
//!     fn wants(&self, kind: EventKind) -> bool {
//!         matches!(kind, EventKind::Connected | EventKind::Disconnected)
//!     }
//! }
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
