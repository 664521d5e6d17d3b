//! Error types used throughout the domain

use keel_common::error::{
    CommonError, ErrorCategory, ErrorClassification, ErrorSeverity, FailureOrigin,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Keel
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeelError {
    /// Failure origin this variant classifies as
    pub const fn origin(&self) -> FailureOrigin {
        match self {
            Self::Config(_) | Self::NotSupported(_) => FailureOrigin::Configuration,
            Self::Storage(_) => FailureOrigin::Resource,
            Self::Network(_) => FailureOrigin::Network,
            Self::NotFound(_) | Self::InvalidInput(_) => FailureOrigin::Validation,
            Self::Internal(_) => FailureOrigin::CriticalRuntime,
        }
    }
}

impl ErrorClassification for KeelError {
    fn category(&self) -> ErrorCategory {
        self.origin().category()
    }

    fn severity(&self) -> ErrorSeverity {
        self.origin().severity()
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Storage(_) => "StorageError",
            Self::Network(_) => "ConnectionError",
            Self::NotFound(_) => "NotFound",
            Self::InvalidInput(_) => "InvalidInput",
            Self::NotSupported(_) => "NotSupported",
            Self::Internal(_) => "InternalError",
        }
    }

    fn is_recoverable(&self) -> bool {
        self.origin().is_recoverable()
    }
}

impl From<CommonError> for KeelError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Config { .. } => Self::Config(err.to_string()),
            CommonError::NotSupported { operation } => Self::NotSupported(operation),
            CommonError::Persistence { .. } | CommonError::Database { .. } => {
                Self::Storage(err.to_string())
            }
            CommonError::Network { .. }
            | CommonError::Timeout { .. }
            | CommonError::ExternalApi { .. } => Self::Network(err.to_string()),
            CommonError::Validation { .. } | CommonError::Serialization { .. } => {
                Self::InvalidInput(err.to_string())
            }
            _ => Self::Internal(err.to_string()),
        }
    }
}

/// Result type alias for Keel operations
pub type Result<T> = std::result::Result<T, KeelError>;
