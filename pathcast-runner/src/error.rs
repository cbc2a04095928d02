//! Simulation error type.

use pathcast_core::data::DataError;
use pathcast_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("the full-history back-test needs a historical store, got a realtime one")]
    RealtimeHistory,
}

impl From<DataError> for SimulationError {
    fn from(e: DataError) -> Self {
        Self::Core(CoreError::Data(e))
    }
}

pub type SimulationResult<T> = Result<T, SimulationError>;
