//! Serial execution primitive backing the supervisors.

mod event_loop;

pub use event_loop::{DisposeMode, EventLoop};
