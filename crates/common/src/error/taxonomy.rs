//! Failure taxonomy shared by every resilience component
//!
//! Classification is derived from a small, closed set of [`FailureOrigin`]
//! tags supplied at the point of failure. Each origin maps to exactly one
//! severity, category, retry-strategy hint and recoverability flag, so two
//! failures with the same origin always classify identically.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How serious a failure is, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Cosmetic or expected conditions
    Low,
    /// Degraded but operational
    Medium,
    /// Failure requiring attention
    High,
    /// System integrity at risk; halts batches
    Critical,
}

impl ErrorSeverity {
    /// All severities, least severe first
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Stable lowercase name used in metrics breakdowns
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Functional area a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Database,
    Validation,
    BusinessLogic,
    ExternalApi,
    Configuration,
    Resource,
    Timeout,
    Authentication,
    Permission,
}

impl ErrorCategory {
    /// Every category, in declaration order
    pub const ALL: [Self; 10] = [
        Self::Network,
        Self::Database,
        Self::Validation,
        Self::BusinessLogic,
        Self::ExternalApi,
        Self::Configuration,
        Self::Resource,
        Self::Timeout,
        Self::Authentication,
        Self::Permission,
    ];

    /// Stable snake_case name used in metrics breakdowns
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Database => "database",
            Self::Validation => "validation",
            Self::BusinessLogic => "business_logic",
            Self::ExternalApi => "external_api",
            Self::Configuration => "configuration",
            Self::Resource => "resource",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff shape, used both as a policy setting and as the retry hint an
/// error record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Not retried; as a policy setting, every attempt waits `base_delay`
    None,
    /// `base * exponential_base^(attempt - 1)`
    Exponential,
    /// `base * attempt`
    Linear,
    /// No wait between attempts
    Immediate,
}

impl RetryStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Exponential => "exponential",
            Self::Linear => "linear",
            Self::Immediate => "immediate",
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract origin of a failure, supplied by the code that observed it
///
/// | Origin | Severity | Category | Hint | Recoverable |
/// |--------|----------|----------|------|-------------|
/// | `Network` | high | network | exponential | yes |
/// | `Timeout` | high | timeout | exponential | yes |
/// | `Database` | high | database | linear | yes |
/// | `ExternalApi` | medium | external_api | exponential | yes |
/// | `Validation` | medium | validation | none | yes |
/// | `Authentication` | high | authentication | none | yes |
/// | `Permission` | medium | permission | none | yes |
/// | `Configuration` | high | configuration | none | yes |
/// | `Resource` | medium | resource | linear | yes |
/// | `CriticalRuntime` | critical | business_logic | none | no |
/// | `Unknown` | low | business_logic | none | yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    Network,
    Timeout,
    Database,
    ExternalApi,
    Validation,
    Authentication,
    Permission,
    Configuration,
    Resource,
    CriticalRuntime,
    Unknown,
}

impl FailureOrigin {
    pub const fn severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Database => ErrorSeverity::High,
            Self::Authentication | Self::Configuration => ErrorSeverity::High,
            Self::ExternalApi | Self::Validation | Self::Permission | Self::Resource => {
                ErrorSeverity::Medium
            }
            Self::CriticalRuntime => ErrorSeverity::Critical,
            Self::Unknown => ErrorSeverity::Low,
        }
    }

    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::Network => ErrorCategory::Network,
            Self::Timeout => ErrorCategory::Timeout,
            Self::Database => ErrorCategory::Database,
            Self::ExternalApi => ErrorCategory::ExternalApi,
            Self::Validation => ErrorCategory::Validation,
            Self::Authentication => ErrorCategory::Authentication,
            Self::Permission => ErrorCategory::Permission,
            Self::Configuration => ErrorCategory::Configuration,
            Self::Resource => ErrorCategory::Resource,
            Self::CriticalRuntime | Self::Unknown => ErrorCategory::BusinessLogic,
        }
    }

    pub const fn retry_strategy(self) -> RetryStrategy {
        match self {
            Self::Network | Self::Timeout | Self::ExternalApi => RetryStrategy::Exponential,
            Self::Database | Self::Resource => RetryStrategy::Linear,
            _ => RetryStrategy::None,
        }
    }

    pub const fn is_recoverable(self) -> bool {
        !matches!(self, Self::CriticalRuntime)
    }

    /// Origin whose category is `category`; business-logic maps to `Unknown`
    pub const fn for_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Network => Self::Network,
            ErrorCategory::Timeout => Self::Timeout,
            ErrorCategory::Database => Self::Database,
            ErrorCategory::ExternalApi => Self::ExternalApi,
            ErrorCategory::Validation => Self::Validation,
            ErrorCategory::Authentication => Self::Authentication,
            ErrorCategory::Permission => Self::Permission,
            ErrorCategory::Configuration => Self::Configuration,
            ErrorCategory::Resource => Self::Resource,
            ErrorCategory::BusinessLogic => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Database => "database",
            Self::ExternalApi => "external_api",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::Configuration => "configuration",
            Self::Resource => "resource",
            Self::CriticalRuntime => "critical_runtime",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the failure taxonomy
    //!
    //! Tests cover the origin mapping table, severity ordering and the
    //! serialized names used by metrics breakdowns.

    use super::*;

    #[test]
    fn test_origin_mapping_is_total_and_stable() {
        assert_eq!(FailureOrigin::Network.category(), ErrorCategory::Network);
        assert_eq!(FailureOrigin::Network.severity(), ErrorSeverity::High);
        assert_eq!(FailureOrigin::Network.retry_strategy(), RetryStrategy::Exponential);

        assert_eq!(FailureOrigin::Timeout.category(), ErrorCategory::Timeout);
        assert_eq!(FailureOrigin::Validation.retry_strategy(), RetryStrategy::None);
        assert_eq!(FailureOrigin::Resource.retry_strategy(), RetryStrategy::Linear);

        assert_eq!(FailureOrigin::CriticalRuntime.severity(), ErrorSeverity::Critical);
        assert!(!FailureOrigin::CriticalRuntime.is_recoverable());
        assert!(FailureOrigin::Unknown.is_recoverable());
        assert_eq!(FailureOrigin::Unknown.severity(), ErrorSeverity::Low);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::ALL.iter().max(), Some(&ErrorSeverity::Critical));
    }

    /// Validates serialized names match the breakdown keys.
    ///
    /// Assertions:
    /// - Confirms serde output equals `as_str()` for categories and
    ///   severities.
    #[test]
    fn test_serde_names_match_as_str() {
        for category in ErrorCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
        for severity in ErrorSeverity::ALL {
            let json = serde_json::to_string(&severity).unwrap();
            assert_eq!(json, format!("\"{severity}\""));
        }
        let origin: FailureOrigin = serde_json::from_str("\"critical_runtime\"").unwrap();
        assert_eq!(origin, FailureOrigin::CriticalRuntime);
    }
}
