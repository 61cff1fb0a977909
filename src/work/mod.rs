//! Cooperative work-queue primitives.
//!
//! - [`WorkItem`] / [`WorkPromise`] - promise-bearing, cancelable items
//! - [`WorkQueue`] - unbounded FIFO with claim-on-take semantics
//! - [`AutoCancellingQueue`] - queue-side cancellation watchers
//! - [`CompositeWorkQueue`] - fair union over several queues

mod auto_cancel;
mod composite;
mod item;
mod queue;

pub use auto_cancel::AutoCancellingQueue;
pub use composite::CompositeWorkQueue;
pub use item::{Completion, WorkItem, WorkPromise};
pub use queue::{QueueEntry, WorkQueue};
