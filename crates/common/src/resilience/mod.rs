//! Resilience primitives for outbound operations
//!
//! - **[`circuit_breaker`]**: per-destination Closed/Open/Half-Open guard
//! - **[`registry`]**: lazily created breakers shared per destination key
//! - **[`retry`]**: pure retry policy (retryability and backoff delays)
//! - **[`executor`]**: bounded retry loops combining a policy and a breaker,
//!   in async and blocking flavours
//! - **[`clock`]**: time source abstraction with a mock for tests

pub mod circuit_breaker;
pub mod clock;
pub mod executor;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    BreakerConfigError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerSnapshot, CircuitState, OUTCOME_WINDOW,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use executor::{RetryError, RetryExecutor, RetryStats, RetryStatsSnapshot};
pub use registry::CircuitBreakerRegistry;
pub use retry::{RetryConfigError, RetryPolicy, RetryPolicyBuilder, JITTER_FACTOR};
