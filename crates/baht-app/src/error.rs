use baht_core::model::WorkflowError;
use baht_core::tax::TaxError;
use baht_llm::LlmError;
use thiserror::Error;

use crate::currency::CurrencyError;
use crate::storage::StorageError;

/// Errors surfaced by the business services.
///
/// Persistence failures arrive as `anyhow::Error`; the ones that wrap a
/// [`WorkflowError`] (for example a settlement that lost a race) are unwrapped
/// into [`ServiceError::Workflow`] so callers can report them as conflicts.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Tax(#[from] TaxError),

    #[error(transparent)]
    Currency(#[from] CurrencyError),

    #[error("receipt reading failed: {0}")]
    Llm(#[from] LlmError),

    #[error("file storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WorkflowError>() {
            Ok(workflow) => ServiceError::Workflow(workflow),
            Err(other) => ServiceError::Internal(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
