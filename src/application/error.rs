use thiserror::Error;

use crate::{domain::error::PublishedError, infra::error::InfraError};

/// Failure of a top-level command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Published(#[from] PublishedError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
