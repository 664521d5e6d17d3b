//! Shared foundation and runtime utilities for the Keel crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error taxonomy, collections, serde helpers
//! - `runtime`: resilience primitives (circuit breakers, retry policy and
//!   executor)
//! - `observability`: tracing instrumentation (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
#[macro_use]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{
    CommonError, CommonResult, ErrorCategory, ErrorClassification, ErrorSeverity, FailureOrigin,
    RetryStrategy,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerSnapshot,
    CircuitState, Clock, MockClock, RetryError, RetryExecutor, RetryPolicy, RetryStatsSnapshot,
    SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
