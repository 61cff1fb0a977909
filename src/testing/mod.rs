//! Test doubles used by the integration suite.
//!
//! [`FakeBroker`] is an in-memory, scriptable implementation of the
//! transport contracts: it routes publishes, tracks consumers with prefetch
//! bookkeeping, emits confirms, and can inject the faults the recovery
//! machinery is built to absorb.

mod broker;

pub use broker::{AckKind, AckRecord, FakeBroker, PublishRecord};
