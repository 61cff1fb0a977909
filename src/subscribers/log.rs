//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints lifecycle events to stdout in a human-readable
//! format. This is primarily useful for development, debugging, and examples.
//!
//! ## Output format
//! ```text
//! [connected] component=connection-1
//! [disconnected] component=connection-1 initiator=peer code=320
//! [channel-active] component=channel-2
//! [topology-failed] component=topology-3 err="rejected by broker: 404 ..."
//! [publishes-requeued] component=producer-4 count=7
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Simple stdout logging subscriber.
///
/// Prints human-readable event descriptions to stdout for debugging and
/// demonstration purposes. Not intended for production use - implement a
/// custom [`Subscribe`] for structured logging or metrics collection.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let component = e.component.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::Connected => {
                println!("[connected] component={component}");
            }
            EventKind::Disconnected => {
                println!(
                    "[disconnected] component={component} initiator={:?} code={:?}",
                    e.initiator, e.code
                );
            }
            EventKind::ConnectionBlocked => {
                println!("[blocked] component={component} reason={:?}", e.error);
            }
            EventKind::ConnectionUnblocked => {
                println!("[unblocked] component={component}");
            }
            EventKind::ConnectionDisposed => {
                println!("[connection-disposed] component={component}");
            }
            EventKind::ChannelActive => {
                println!("[channel-active] component={component}");
            }
            EventKind::ChannelStopped => {
                println!("[channel-stopped] component={component}");
            }
            EventKind::ChannelDisposed => {
                println!("[channel-disposed] component={component}");
            }
            EventKind::TopologyApplied => {
                println!("[topology-applied] component={component}");
            }
            EventKind::TopologyFailed => {
                println!("[topology-failed] component={component} err={:?}", e.error);
            }
            EventKind::PublishesRequeued => {
                println!("[publishes-requeued] component={component} count={:?}", e.count);
            }
            EventKind::ConsumerStarted => {
                println!("[consumer-started] component={component}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
