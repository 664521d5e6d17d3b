//! Common error types and classification for the Keel resilience core
//!
//! The error handling system is built on three pieces:
//!
//! 1. **`CommonError`**: the shared vocabulary of outbound-operation failures
//!    (network, timeout, database, external API, validation, ...). Module
//!    errors embed it rather than duplicating its variants.
//!
//! 2. **`ErrorClassification`**: the interface the retry policy, batch
//!    processor and aggregator consult. It exposes category, severity,
//!    concrete error type name, recoverability and an optional retry hint.
//!
//! 3. **[`taxonomy`]**: the closed severity/category/strategy enums and the
//!    [`FailureOrigin`] tags that drive deterministic classification.
//!
//! ## Composition
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum StoreError {
//!     #[error("Store is read-only")]
//!     ReadOnly,
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_classification!(StoreError, Common,
//!     Self::ReadOnly => { origin: FailureOrigin::Permission, error_type: "ReadOnly" },
//! );
//! ```

pub mod taxonomy;

use std::fmt;
use std::time::Duration;

pub use taxonomy::{ErrorCategory, ErrorSeverity, FailureOrigin, RetryStrategy};

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across the resilience core
///
/// Every variant maps onto one [`FailureOrigin`]; classification is derived
/// from that origin so `CommonError` and structured error records agree.
#[derive(Debug, Clone, PartialEq)]
pub enum CommonError {
    /// Invalid or missing configuration
    Config { message: String },

    /// Connectivity failure talking to a remote service
    Network { service: String, message: String },

    /// Operation exceeded its deadline
    Timeout { operation: String, duration: Duration },

    /// Database access failure
    Database { operation: String, message: String },

    /// Remote API answered with an error
    ExternalApi {
        service: String,
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Input failed validation
    Validation { field: String, message: String },

    /// Caller could not be authenticated
    Unauthorized { operation: String },

    /// Caller is authenticated but lacks permission
    PermissionDenied { operation: String, required_permission: Option<String> },

    /// A local resource (disk, memory, file handle) is unavailable
    Resource { resource: String, message: String },

    /// Serialization or deserialization failure
    Serialization { message: String, format: Option<String> },

    /// Durable storage failure (file I/O, store adapters)
    Persistence { message: String },

    /// Capability is not offered by this implementation
    NotSupported { operation: String },

    /// Invariant violation; never retried
    Internal { message: String },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message } => write!(f, "Configuration error: {}", message),
            Self::Network { service, message } => {
                write!(f, "Network error reaching '{}': {}", service, message)
            }
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Database { operation, message } => {
                write!(f, "Database error during '{}': {}", operation, message)
            }
            Self::ExternalApi { service, status, message, .. } => {
                if let Some(status) = status {
                    write!(f, "External API '{}' returned {}: {}", service, status, message)
                } else {
                    write!(f, "External API '{}' failed: {}", service, message)
                }
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            Self::Unauthorized { operation } => {
                write!(f, "Unauthenticated request for '{}'", operation)
            }
            Self::PermissionDenied { operation, required_permission } => {
                if let Some(perm) = required_permission {
                    write!(f, "Permission denied for '{}' (requires: {})", operation, perm)
                } else {
                    write!(f, "Permission denied for '{}'", operation)
                }
            }
            Self::Resource { resource, message } => {
                write!(f, "Resource '{}' unavailable: {}", resource, message)
            }
            Self::Serialization { message, format } => {
                if let Some(format) = format {
                    write!(f, "Serialization error ({}): {}", format, message)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
            Self::Persistence { message } => write!(f, "Persistence error: {}", message),
            Self::NotSupported { operation } => {
                write!(f, "Operation '{}' is not supported", operation)
            }
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CommonError {}

impl CommonError {
    /// Failure origin this variant classifies as
    pub const fn origin(&self) -> FailureOrigin {
        match self {
            Self::Config { .. } | Self::NotSupported { .. } => FailureOrigin::Configuration,
            Self::Network { .. } => FailureOrigin::Network,
            Self::Timeout { .. } => FailureOrigin::Timeout,
            Self::Database { .. } => FailureOrigin::Database,
            Self::ExternalApi { .. } => FailureOrigin::ExternalApi,
            Self::Validation { .. } | Self::Serialization { .. } => FailureOrigin::Validation,
            Self::Unauthorized { .. } => FailureOrigin::Authentication,
            Self::PermissionDenied { .. } => FailureOrigin::Permission,
            Self::Resource { .. } | Self::Persistence { .. } => FailureOrigin::Resource,
            Self::Internal { .. } => FailureOrigin::CriticalRuntime,
        }
    }

    /// Whether this error reports an unsupported capability
    pub const fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn network<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Network { service: service.into(), message: message.into() }
    }

    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    pub fn database<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Database { operation: operation.into(), message: message.into() }
    }

    pub fn external_api<S: Into<String>, M: Into<String>>(
        service: S,
        status: Option<u16>,
        message: M,
    ) -> Self {
        Self::ExternalApi {
            service: service.into(),
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// External API error carrying a server-provided retry delay
    pub fn external_api_with_retry<S: Into<String>, M: Into<String>>(
        service: S,
        status: Option<u16>,
        message: M,
        retry_after: Duration,
    ) -> Self {
        Self::ExternalApi {
            service: service.into(),
            status,
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn unauthorized<O: Into<String>>(operation: O) -> Self {
        Self::Unauthorized { operation: operation.into() }
    }

    pub fn permission_denied<O: Into<String>>(operation: O) -> Self {
        Self::PermissionDenied { operation: operation.into(), required_permission: None }
    }

    pub fn resource<R: Into<String>, M: Into<String>>(resource: R, message: M) -> Self {
        Self::Resource { resource: resource.into(), message: message.into() }
    }

    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into(), format: None }
    }

    pub fn serialization_format<F: Into<String>, S: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence { message: message.into() }
    }

    pub fn not_supported<O: Into<String>>(operation: O) -> Self {
        Self::NotSupported { operation: operation.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl ErrorClassification for CommonError {
    fn category(&self) -> ErrorCategory {
        self.origin().category()
    }

    fn severity(&self) -> ErrorSeverity {
        self.origin().severity()
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Network { .. } => "ConnectionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Database { .. } => "DatabaseError",
            Self::ExternalApi { .. } => "ExternalApiError",
            Self::Validation { .. } => "ValidationError",
            Self::Unauthorized { .. } => "AuthenticationError",
            Self::PermissionDenied { .. } => "PermissionError",
            Self::Resource { .. } => "ResourceError",
            Self::Serialization { .. } => "SerializationError",
            Self::Persistence { .. } => "PersistenceError",
            Self::NotSupported { .. } => "NotSupported",
            Self::Internal { .. } => "InternalError",
        }
    }

    fn is_recoverable(&self) -> bool {
        self.origin().is_recoverable()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ExternalApi { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Standard interface for classifying failures
///
/// The retry policy uses `category`, `error_type` and `retry_hint` to decide
/// mechanical retry eligibility; the batch processor and aggregator use
/// `severity` and `is_recoverable`.
pub trait ErrorClassification {
    /// Functional area of the failure
    fn category(&self) -> ErrorCategory;

    /// Severity used for batch short-circuiting and alerting
    fn severity(&self) -> ErrorSeverity;

    /// Concrete failure type name (e.g. `ConnectionError`)
    ///
    /// Retry policies may list type names as retryable, and pattern
    /// detection groups on it.
    fn error_type(&self) -> &str;

    /// Whether the system can continue after this failure
    fn is_recoverable(&self) -> bool {
        !self.is_critical()
    }

    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Retry strategy hint carried by structured error records
    ///
    /// Plain errors return `None`; only records that were classified at the
    /// point of failure carry a hint.
    fn retry_hint(&self) -> Option<RetryStrategy> {
        None
    }

    /// Server-suggested delay before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl<T: ErrorClassification + ?Sized> ErrorClassification for &T {
    fn category(&self) -> ErrorCategory {
        (**self).category()
    }

    fn severity(&self) -> ErrorSeverity {
        (**self).severity()
    }

    fn error_type(&self) -> &str {
        (**self).error_type()
    }

    fn is_recoverable(&self) -> bool {
        (**self).is_recoverable()
    }

    fn is_critical(&self) -> bool {
        (**self).is_critical()
    }

    fn retry_hint(&self) -> Option<RetryStrategy> {
        (**self).retry_hint()
    }

    fn retry_after(&self) -> Option<Duration> {
        (**self).retry_after()
    }
}

// Standard conversions from common error types
impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

/// Implement `ErrorClassification` by delegating to an embedded `CommonError`
///
/// Module-specific variants classify through a [`FailureOrigin`] and name
/// their concrete error type explicitly.
///
/// ```rust,ignore
/// impl_error_classification!(SchedulerError, Common,
///     Self::AlreadyRunning => {
///         origin: FailureOrigin::Configuration,
///         error_type: "SchedulerAlreadyRunning",
///     },
/// );
/// ```
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                origin: $origin:expr,
                error_type: $name:expr
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn category(&self) -> $crate::error::ErrorCategory {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::category(e),
                    $(
                        $variant => $crate::error::FailureOrigin::category($origin),
                    )*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::severity(e),
                    $(
                        $variant => $crate::error::FailureOrigin::severity($origin),
                    )*
                }
            }

            fn error_type(&self) -> &str {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::error_type(e),
                    $(
                        $variant => $name,
                    )*
                }
            }

            fn is_recoverable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => {
                        $crate::error::ErrorClassification::is_recoverable(e)
                    }
                    $(
                        $variant => $crate::error::FailureOrigin::is_recoverable($origin),
                    )*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => $crate::error::ErrorClassification::retry_after(e),
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}
