//! Service Errors
//!
//! Error taxonomy shared by every service. Validation, not-found and conflict
//! errors are raised before any side effect and are never retried.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::repository::RepositoryError;
use crate::service::lifecycle::TransitionError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Every violation found in the request, not just the first
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage failure: {0}")]
    Storage(#[from] RepositoryError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(vec![message.into()])
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(what.to_string())
    }
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        ServiceError::Conflict(err.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
