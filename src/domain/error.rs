use thiserror::Error;

use crate::application::repos::RepoError;

#[derive(Debug, Error)]
pub enum PublishedError {
    #[error("`{entity}` `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid configuration: {message}")]
    Configuration { message: String },
    #[error("conversion of property `{alias}` failed: {message}")]
    Conversion { alias: String, message: String },
    #[error("`{entity}` `{id}` is no longer resolvable")]
    StaleReference { entity: &'static str, id: String },
    #[error("operation `{operation}` was cancelled")]
    Cancelled { operation: &'static str },
    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl PublishedError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn conversion(alias: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            alias: alias.into(),
            message: message.into(),
        }
    }

    pub fn stale(entity: &'static str, id: impl ToString) -> Self {
        Self::StaleReference {
            entity,
            id: id.to_string(),
        }
    }

    pub fn cancelled(operation: &'static str) -> Self {
        Self::Cancelled { operation }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Repository(RepoError::NotFound)
        )
    }
}

/// Failure raised by a property value converter.
///
/// Converters report the reason only; the pipeline attaches the property alias
/// when it surfaces the failure as [`PublishedError::Conversion`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
