use thiserror::Error;

use crate::questionnaire::store::StoreError;

/// Failure of a template service operation.
#[derive(Debug, Error)]
pub enum QuestionnaireError {
    #[error("{0}")]
    NotFound(String),

    /// Input failed validation or the operation is refused in the current state.
    #[error("{0}")]
    Invalid(String),

    /// Optimistic retries were exhausted or a stale token was supplied.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QuestionnaireError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuestionnaireError::Store(e) if e.is_retryable())
    }
}
