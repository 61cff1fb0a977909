//! # Declarative operations exposed to topology callbacks.
//!
//! A configuration callback receives a [`TopologyOps`] bound to the live
//! channel and issues declarations through it. Each call is a synchronous
//! model RPC executed serially on the channel's loop; transport failures
//! are translated to [`TopologyError`] here, so callbacks stay `?`-friendly.
//!
//! ## Example
//! ```no_run
//! use amqpvisor::{topology, ExchangeKind, ExchangeSpec, QueueSpec};
//!
//! let map = topology(|ops| async move {
//!     ops.exchange_declare(ExchangeSpec::new("orders", ExchangeKind::Fanout))
//!         .await?;
//!     let q = ops.queue_declare(QueueSpec::new("orders-all")).await?;
//!     ops.bind(&q.name, "orders", "").await?;
//!     Ok(())
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::channel::ActiveChannel;
use crate::error::TopologyError;
use crate::transport::{
    Arguments, ExchangeKind, ExchangeSpec, QueueDeclareOk, QueueSpec,
};

/// Handle for issuing declarations on the active channel.
#[derive(Clone)]
pub struct TopologyOps {
    chan: ActiveChannel,
}

impl TopologyOps {
    pub(crate) fn new(chan: ActiveChannel) -> Self {
        Self { chan }
    }

    /// Declares an exchange.
    pub async fn exchange_declare(&self, spec: ExchangeSpec) -> Result<(), TopologyError> {
        self.chan
            .model
            .exchange_declare(&spec)
            .await
            .map_err(TopologyError::from_transport)
    }

    /// Verifies an exchange exists without creating it.
    pub async fn exchange_declare_passive(&self, name: &str) -> Result<(), TopologyError> {
        let mut spec = ExchangeSpec::new(name, ExchangeKind::Direct);
        spec.passive = true;
        self.exchange_declare(spec).await
    }

    /// Deletes an exchange.
    pub async fn exchange_delete(&self, name: &str, if_unused: bool) -> Result<(), TopologyError> {
        self.chan
            .model
            .exchange_delete(name, if_unused)
            .await
            .map_err(TopologyError::from_transport)
    }

    /// Declares a queue.
    pub async fn queue_declare(&self, spec: QueueSpec) -> Result<QueueDeclareOk, TopologyError> {
        self.chan
            .model
            .queue_declare(&spec)
            .await
            .map_err(TopologyError::from_transport)
    }

    /// Verifies a queue exists without creating it.
    pub async fn queue_declare_passive(&self, name: &str) -> Result<QueueDeclareOk, TopologyError> {
        let mut spec = QueueSpec::new(name);
        spec.passive = true;
        self.queue_declare(spec).await
    }

    /// Declares a server-named exclusive auto-delete queue.
    pub async fn queue_declare_exclusive(&self) -> Result<QueueDeclareOk, TopologyError> {
        self.queue_declare(QueueSpec::exclusive_server_named()).await
    }

    /// Declares a named exclusive auto-delete queue.
    pub async fn queue_declare_exclusive_named(
        &self,
        name: &str,
    ) -> Result<QueueDeclareOk, TopologyError> {
        let mut spec = QueueSpec::new(name);
        spec.exclusive = true;
        spec.auto_delete = true;
        self.queue_declare(spec).await
    }

    /// Deletes a queue, returning the number of messages it held.
    pub async fn queue_delete(
        &self,
        name: &str,
        if_unused: bool,
        if_empty: bool,
    ) -> Result<u32, TopologyError> {
        self.chan
            .model
            .queue_delete(name, if_unused, if_empty)
            .await
            .map_err(TopologyError::from_transport)
    }

    /// Purges a queue, returning the number of messages removed.
    pub async fn queue_purge(&self, name: &str) -> Result<u32, TopologyError> {
        self.chan
            .model
            .queue_purge(name)
            .await
            .map_err(TopologyError::from_transport)
    }

    /// Binds a queue to an exchange.
    pub async fn bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TopologyError> {
        self.bind_with_arguments(queue, exchange, routing_key, &Arguments::new())
            .await
    }

    /// Binds a queue to an exchange with binding arguments.
    pub async fn bind_with_arguments(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &Arguments,
    ) -> Result<(), TopologyError> {
        self.chan
            .model
            .queue_bind(queue, exchange, routing_key, arguments)
            .await
            .map_err(TopologyError::from_transport)
    }

    /// Removes a queue-to-exchange binding.
    pub async fn unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TopologyError> {
        self.chan
            .model
            .queue_unbind(queue, exchange, routing_key, &Arguments::new())
            .await
            .map_err(TopologyError::from_transport)
    }
}

/// Configuration callback: declares whatever the component needs.
pub type TopologyMap =
    Arc<dyn Fn(TopologyOps) -> BoxFuture<'static, Result<(), TopologyError>> + Send + Sync>;

/// Consumer configuration callback: declares and returns the queue to
/// consume from.
pub type ConsumerTopologyMap =
    Arc<dyn Fn(TopologyOps) -> BoxFuture<'static, Result<String, TopologyError>> + Send + Sync>;

/// Wraps an async closure as a [`TopologyMap`].
pub fn topology<F, Fut>(f: F) -> TopologyMap
where
    F: Fn(TopologyOps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TopologyError>> + Send + 'static,
{
    Arc::new(move |ops| Box::pin(f(ops)))
}

/// Wraps an async closure as a [`ConsumerTopologyMap`].
pub fn consumer_topology<F, Fut>(f: F) -> ConsumerTopologyMap
where
    F: Fn(TopologyOps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, TopologyError>> + Send + 'static,
{
    Arc::new(move |ops| Box::pin(f(ops)))
}
