//! Engine error taxonomy
//!
//! Sizing and numeric failures are recoverable and absorbed by the
//! orchestrator; sequencing and execution failures are fatal for the asset.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("insufficient funds: required {required:.8}, available {available:.8}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("ladder exhausted after {max_rungs} rungs")]
    LadderExhausted { max_rungs: u32 },

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("numeric degenerate input: {0}")]
    NumericDegenerate(&'static str),

    #[error("execution desync: {0}")]
    ExecutionDesync(String),

    #[error("sell of {requested} exceeds held quantity {held}")]
    Oversell { held: f64, requested: f64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Errors the orchestrator swallows instead of returning to the bar loop
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientFunds { .. }
                | EngineError::LadderExhausted { .. }
                | EngineError::NumericDegenerate(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
