//! Topology declaration: operation surface and the Once/Persistent runner.

mod ops;
mod runner;

pub use ops::{consumer_topology, topology, ConsumerTopologyMap, TopologyMap, TopologyOps};
pub use runner::{ErrorHook, ReadyHook, TopologyMode, TopologyRunner};
