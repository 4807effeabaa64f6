use std::fmt;

use invtrack_ledger::AdjustmentError;

/// Errors surfaced by the engine's exposed API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Administrative add/remove with a non-positive amount. No state changed.
    InvalidAdjustment(AdjustmentError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidAdjustment(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::InvalidAdjustment(e) => Some(e),
        }
    }
}

impl From<AdjustmentError> for EngineError {
    fn from(e: AdjustmentError) -> Self {
        EngineError::InvalidAdjustment(e)
    }
}
