//! `voxnlu-bus` — topic message bus abstraction (mechanics only).
//!
//! Broker topology, transports and acknowledgement plumbing live behind the
//! [`MessageBus`] trait so the consumers and handlers never depend on a
//! specific broker. An in-memory implementation is provided for tests/dev;
//! infrastructure-backed transports live in `voxnlu-infra`.

pub mod bus;
pub mod delivery;
pub mod error;
pub mod in_memory_bus;
pub mod topic;

pub use bus::{MessageBus, Subscription};
pub use delivery::{AckOutcome, Acker, Delivery};
pub use error::BusError;
pub use in_memory_bus::{AckRecord, InMemoryBus, Published};
pub use topic::{response_routing_key, topic_matches};
