//! Channel ownership, recovery, and the handler capability interface.

mod handler;
mod supervisor;

pub use handler::{ActiveChannel, ChannelHandler, ReturnedMessage};
pub use supervisor::{ChannelState, ChannelSupervisor};
