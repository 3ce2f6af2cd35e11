//! Background workers.

pub mod consumer;

pub use consumer::{ConsumerWorker, WorkerHandle, spawn_intent_consumers};
