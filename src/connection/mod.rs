//! Connection ownership and recovery.

mod supervisor;

pub use supervisor::{ConnectionState, ConnectionSupervisor};
