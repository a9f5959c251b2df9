//! Error taxonomy of the engine.
//!
//! Only `InsufficientData` ever reaches a caller. The other variants describe
//! why an orchestration attempt produced no decisive signal and are absorbed
//! by the retry loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("market data collection failed: {0}")]
    CollectionFailure(String),

    #[error("oracle call failed: {0}")]
    OracleFailure(String),

    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

impl EngineError {
    /// Wrap a collaborator error, keeping its context chain in the message.
    pub fn collection(err: anyhow::Error) -> Self {
        EngineError::CollectionFailure(format!("{:#}", err))
    }

    pub fn oracle(err: anyhow::Error) -> Self {
        EngineError::OracleFailure(format!("{:#}", err))
    }
}
