use shared::types::TokenStatus;
use thiserror::Error;

/// Failure taxonomy of the allocation engine. Business-rule failures are
/// surfaced as-is; only storage conflicts are retried by the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("doctor not found or inactive")]
    DoctorNotFound,
    #[error("token not found")]
    TokenNotFound,
    #[error("slot not found")]
    SlotNotFound,
    #[error("invalid status transition from {} to {}", from.as_str(), to.as_str())]
    InvalidStatus { from: TokenStatus, to: TokenStatus },
    #[error("token is already cancelled")]
    AlreadyCancelled,
    #[error("a completed token cannot be cancelled")]
    CannotCancelCompleted,
    #[error("storage conflict")]
    StorageConflict,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageConflict)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
