//! `voxnlu-core` — domain building blocks shared by the engine and the bus glue.
//!
//! This crate contains **pure domain** types (no process or transport concerns):
//! intents and their registry, parse results, and the typed command messages
//! accepted at the message-bus boundary.

pub mod error;
pub mod intent;
pub mod message;
pub mod parse;
pub mod registry;

pub use error::{DomainError, DomainResult};
pub use intent::Intent;
pub use message::{NluCommand, ParseText, UpsertIntent};
pub use parse::{EntityMatch, ParseResult, TopIntent};
pub use registry::IntentRegistry;
