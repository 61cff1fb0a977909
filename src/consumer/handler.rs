//! # User-facing delivery handler.
//!
//! [`DeliveryHandler`] is the trait consumers implement;
//! [`HandlerFn`] wraps a closure so simple handlers stay one-liners:
//!
//! ```no_run
//! use amqpvisor::{AckDecision, ConsumeError, HandlerFn, HandlerRef};
//!
//! let handler: HandlerRef = HandlerFn::arc(|delivery, _cancel| async move {
//!     println!("got {} bytes", delivery.body.len());
//!     Ok::<_, ConsumeError>(AckDecision::Ack)
//! });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::consumer::delivery::{AckDecision, Delivery};
use crate::error::ConsumeError;

/// Boxed future returned by [`DeliveryHandler::handle`].
pub type BoxHandleFuture =
    Pin<Box<dyn Future<Output = Result<AckDecision, ConsumeError>> + Send + 'static>>;

/// Shared handle to a delivery handler.
pub type HandlerRef = Arc<dyn DeliveryHandler>;

/// Processes one delivery at a time.
///
/// The handler is invoked **at most once** per delivery. The cancellation
/// fires when the consumer is disposing or its channel is being replaced;
/// a decision returned after that point is not sent to the broker (the
/// broker redelivers on its own).
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Handles a delivery and decides its acknowledgement.
    ///
    /// Returning `Err` is translated to `Nack` with the configured requeue
    /// behavior.
    fn handle(&self, delivery: Delivery, cancel: CancellationToken) -> BoxHandleFuture;
}

/// Function-backed handler implementation.
///
/// Wraps a closure that *creates* a new future per delivery.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new function-backed handler.
    ///
    /// Prefer [`HandlerFn::arc`] when you immediately need a [`HandlerRef`].
    pub fn new(f: F) -> Self {
        Self { f }
    }

}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Delivery, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AckDecision, ConsumeError>> + Send + 'static,
{
    /// Creates the handler and returns it as a shared handle.
    pub fn arc(f: F) -> HandlerRef {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> DeliveryHandler for HandlerFn<F>
where
    F: Fn(Delivery, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AckDecision, ConsumeError>> + Send + 'static,
{
    fn handle(&self, delivery: Delivery, cancel: CancellationToken) -> BoxHandleFuture {
        Box::pin((self.f)(delivery, cancel))
    }
}
