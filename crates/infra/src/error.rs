use thiserror::Error;

use voxnlu_bus::BusError;
use voxnlu_core::DomainError;
use voxnlu_engine::EngineError;

/// Why a delivery was rejected.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("rejected payload: {0}")]
    Decode(#[from] DomainError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to publish response: {0}")]
    Publish(#[from] BusError),
}
