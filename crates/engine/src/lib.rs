//! `voxnlu-engine` — supervision and training pipeline for the external NLU engine.
//!
//! ```text
//! retrain(intents) ─► ArtifactGenerator ─► Trainer (if changed / no model) ─► Supervisor stop+start
//! parse(text)      ─► Supervisor stdin  ─► ResultReader (brace framing)    ─► ParseResult
//! ```
//!
//! Both paths go through [`Manager`], which owns the single engine subprocess
//! behind one lock.

pub mod artifacts;
pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
mod output;
pub mod supervisor;
pub mod trainer;

pub use artifacts::{ArtifactError, ArtifactGenerator, TrainingArtifacts, ensure_default_config};
pub use codec::{ProtocolError, ResultReader};
pub use config::{CommandSpec, EngineConfig};
pub use error::EngineError;
pub use manager::{Manager, NluEngine, RetrainOutcome};
pub use supervisor::{EngineState, Supervisor};
pub use trainer::{ProcessTrainer, Trainer, TrainingError, TrainingJob};
