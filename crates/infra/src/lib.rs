//! Infrastructure layer: bus consumers, command handlers, broker transports.

pub mod error;
pub mod event_bus;
pub mod handlers;
pub mod topology;
pub mod workers;


pub use error::HandlerError;
pub use handlers::IntentHandlers;
pub use topology::{Binding, EXCHANGE, INTENT_BINDINGS};
pub use workers::{ConsumerWorker, WorkerHandle, spawn_intent_consumers};
