use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::codec::ProtocolError;
use crate::trainer::TrainingError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    Unavailable,

    #[error("no trained model at {}", .0.display())]
    ModelMissing(PathBuf),

    #[error("failed to spawn engine `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("engine I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Artifacts(#[from] ArtifactError),

    #[error("training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("engine lock poisoned")]
    Poisoned,
}

impl EngineError {
    /// The engine connection was torn down and needs `ensure_started` before the next query.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Io(_))
    }
}
