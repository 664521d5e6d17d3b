//! Retry executor
//!
//! [`RetryExecutor`] pairs a [`RetryPolicy`] with a destination's
//! [`CircuitBreaker`] and runs a unit of work up to `max_attempts` times.
//! The async and blocking entry points share one decision path
//! ([`RetryExecutor::admit`], [`RetryExecutor::settle_failure`]) and differ
//! only in how they wait between attempts.
//!
//! Callers never observe intermediate attempts: the result is either the
//! operation's value or a terminal [`RetryError`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::circuit_breaker::CircuitBreaker;
use super::clock::{Clock, SystemClock};
use super::retry::RetryPolicy;
use crate::error::{ErrorCategory, ErrorClassification, ErrorSeverity, FailureOrigin};

/// Terminal outcome of a retried operation
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The destination's breaker rejected the attempt; no budget consumed
    #[error("Circuit breaker open for '{destination}'")]
    CircuitOpen { destination: String, retry_after: Option<Duration> },

    /// Every attempt failed with a retryable error
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The operation failed with an error the policy does not retry
    #[error("Non-retryable failure on attempt {attempts}: {source}")]
    NonRetryable {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The final attempt exceeded the per-attempt timeout
    #[error("Attempt {attempts} timed out after {timeout:?}")]
    TimedOut { attempts: u32, timeout: Duration },

    /// Cancelled by the caller; the in-progress wait or attempt was abandoned
    #[error("Retry cancelled after {attempts} completed attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Completed attempts before the executor gave up
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { .. } => 0,
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::TimedOut { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The last operation error, if the final attempt produced one
    pub const fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => Some(source),
            _ => None,
        }
    }

    const fn origin(&self) -> FailureOrigin {
        match self {
            Self::CircuitOpen { .. } => FailureOrigin::ExternalApi,
            Self::TimedOut { .. } => FailureOrigin::Timeout,
            _ => FailureOrigin::Unknown,
        }
    }
}

impl<E> ErrorClassification for RetryError<E>
where
    E: ErrorClassification + std::error::Error + 'static,
{
    fn category(&self) -> ErrorCategory {
        self.last_error().map_or_else(|| self.origin().category(), ErrorClassification::category)
    }

    fn severity(&self) -> ErrorSeverity {
        self.last_error().map_or_else(|| self.origin().severity(), ErrorClassification::severity)
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => {
                source.error_type()
            }
            Self::CircuitOpen { .. } => "CircuitBreakerOpen",
            Self::TimedOut { .. } => "TimeoutError",
            Self::Cancelled { .. } => "TaskCancelled",
        }
    }

    fn is_recoverable(&self) -> bool {
        self.last_error().map_or(true, ErrorClassification::is_recoverable)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => self.last_error().and_then(ErrorClassification::retry_after),
        }
    }
}

/// Per-executor counters, safe to update from concurrent callers
#[derive(Debug, Default)]
pub struct RetryStats {
    total_attempts: AtomicU64,
    successful_retries: AtomicU64,
    failed_retries: AtomicU64,
    circuit_breaker_rejections: AtomicU64,
}

/// Point-in-time copy of [`RetryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStatsSnapshot {
    /// Attempts actually started
    pub total_attempts: u64,
    /// Calls that succeeded after at least one failed attempt
    pub successful_retries: u64,
    /// Calls that ended in a terminal failure
    pub failed_retries: u64,
    /// Attempts refused by an open breaker
    pub circuit_breaker_rejections: u64,
}

impl RetryStats {
    pub fn snapshot(&self) -> RetryStatsSnapshot {
        RetryStatsSnapshot {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            failed_retries: self.failed_retries.load(Ordering::Relaxed),
            circuit_breaker_rejections: self.circuit_breaker_rejections.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total_attempts.store(0, Ordering::Relaxed);
        self.successful_retries.store(0, Ordering::Relaxed);
        self.failed_retries.store(0, Ordering::Relaxed);
        self.circuit_breaker_rejections.store(0, Ordering::Relaxed);
    }
}

/// Per-attempt timeout, classified as a retryable timeout failure
#[derive(Debug, Clone, Copy)]
struct AttemptTimeout(Duration);

impl ErrorClassification for AttemptTimeout {
    fn category(&self) -> ErrorCategory {
        FailureOrigin::Timeout.category()
    }

    fn severity(&self) -> ErrorSeverity {
        FailureOrigin::Timeout.severity()
    }

    fn error_type(&self) -> &str {
        "TimeoutError"
    }
}

enum Failure<E> {
    Operation(E),
    TimedOut(AttemptTimeout),
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Wait(Duration),
    Exhausted,
    NotRetryable,
}

/// Runs operations against one destination with retries and circuit breaking
pub struct RetryExecutor<C: Clock = SystemClock> {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker<C>>,
    attempt_timeout: Option<Duration>,
    stats: RetryStats,
}

impl<C: Clock> fmt::Debug for RetryExecutor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("destination", &self.breaker.name())
            .field("max_attempts", &self.policy.max_attempts)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl<C: Clock> RetryExecutor<C> {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker<C>>) -> Self {
        Self { policy, breaker, attempt_timeout: None, stats: RetryStats::default() }
    }

    /// Bounds each async attempt; an overrun counts as a timeout failure
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Uses the breaker's advisory `call_timeout` as the attempt timeout
    #[must_use]
    pub fn with_breaker_call_timeout(self) -> Self {
        let timeout = self.breaker.config().call_timeout;
        self.with_attempt_timeout(timeout)
    }

    pub fn destination(&self) -> &str {
        self.breaker.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.breaker
    }

    pub fn stats(&self) -> RetryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Runs `operation` with retries, waiting with a non-blocking timer
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + std::error::Error + 'static,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), abandoning the call when `token`
    /// fires
    ///
    /// Cancellation during a wait or an in-flight attempt records nothing
    /// against the breaker.
    pub async fn execute_with_cancellation<F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + std::error::Error + 'static,
    {
        self.run(operation, Some(token)).await
    }

    /// Runs `operation` with retries, blocking the current thread between
    /// attempts
    ///
    /// The attempt timeout is not applied here; a blocking call cannot be
    /// interrupted.
    #[instrument(skip(self, operation), fields(destination = %self.breaker.name()))]
    pub fn execute_blocking<F, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: ErrorClassification + std::error::Error + 'static,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.admit()?;
            match operation() {
                Ok(value) => {
                    self.settle_success(attempt);
                    return Ok(value);
                }
                Err(error) => match self.settle_failure(attempt, &error) {
                    Next::Wait(delay) => std::thread::sleep(delay),
                    next => return Err(Self::terminal(next, attempt, Failure::Operation(error))),
                },
            }
        }
    }

    #[instrument(skip(self, operation, cancel), fields(destination = %self.breaker.name()))]
    async fn run<F, Fut, T, E>(
        &self,
        mut operation: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + std::error::Error + 'static,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(RetryError::Cancelled { attempts: attempt - 1 });
            }
            self.admit()?;

            let attempt_future = self.bounded(operation());
            let outcome = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!(attempt, "retry cancelled during attempt");
                        return Err(RetryError::Cancelled { attempts: attempt - 1 });
                    }
                    outcome = attempt_future => outcome,
                },
                None => attempt_future.await,
            };

            let failure = match outcome {
                Ok(value) => {
                    self.settle_success(attempt);
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let next = match &failure {
                Failure::Operation(error) => self.settle_failure(attempt, error),
                Failure::TimedOut(timeout) => self.settle_failure(attempt, timeout),
            };
            let Next::Wait(delay) = next else {
                return Err(Self::terminal(next, attempt, failure));
            };

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            debug!(attempt, "retry cancelled while waiting");
                            return Err(RetryError::Cancelled { attempts: attempt });
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    async fn bounded<Fut, T, E>(&self, attempt: Fut) -> Result<T, Failure<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result.map_err(Failure::Operation),
                Err(_) => Err(Failure::TimedOut(AttemptTimeout(limit))),
            },
            None => attempt.await.map_err(Failure::Operation),
        }
    }

    /// Consults the breaker before an attempt
    fn admit<E>(&self) -> Result<(), RetryError<E>>
    where
        E: std::error::Error + 'static,
    {
        if !self.breaker.can_execute() {
            self.stats.circuit_breaker_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(destination = %self.breaker.name(), "attempt rejected by open circuit");
            return Err(RetryError::CircuitOpen {
                destination: self.breaker.name().to_string(),
                retry_after: self.breaker.time_until_retry(),
            });
        }
        self.stats.total_attempts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn settle_success(&self, attempt: u32) {
        self.breaker.record_success();
        if attempt > 1 {
            self.stats.successful_retries.fetch_add(1, Ordering::Relaxed);
            debug!(attempt, "operation succeeded after retry");
        }
    }

    /// Records a failed attempt and decides whether to try again
    fn settle_failure<F: ErrorClassification + ?Sized>(&self, attempt: u32, error: &F) -> Next {
        self.breaker.record_failure();

        let next = if !self.policy.is_retryable(error) {
            Next::NotRetryable
        } else if attempt >= self.policy.max_attempts {
            Next::Exhausted
        } else {
            let computed = self.policy.delay_for_attempt(attempt);
            let delay = error
                .retry_after()
                .map_or(computed, |hint| computed.max(hint).min(self.policy.max_delay));
            Next::Wait(delay)
        };

        match next {
            Next::Wait(delay) => debug!(
                attempt,
                error_type = error.error_type(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "attempt failed, retrying"
            ),
            Next::Exhausted | Next::NotRetryable => {
                self.stats.failed_retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    attempt,
                    error_type = error.error_type(),
                    retryable = next == Next::Exhausted,
                    "giving up on operation"
                );
            }
        }
        next
    }

    fn terminal<E>(next: Next, attempts: u32, failure: Failure<E>) -> RetryError<E>
    where
        E: std::error::Error + 'static,
    {
        match failure {
            Failure::TimedOut(AttemptTimeout(timeout)) => RetryError::TimedOut { attempts, timeout },
            Failure::Operation(source) if next == Next::Exhausted => {
                RetryError::Exhausted { attempts, source }
            }
            Failure::Operation(source) => RetryError::NonRetryable { attempts, source },
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry executor
    //!
    //! Tests cover success after retries, exhaustion, non-retryable errors,
    //! breaker rejections, attempt timeouts, cancellation and the blocking
    //! variant's shared decision logic.

    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::error::CommonError;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};

    fn executor(max_attempts: u32, failure_threshold: u32) -> RetryExecutor {
        let policy = RetryPolicy::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(5))
            .jitter(false)
            .build()
            .unwrap();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(failure_threshold)
            .recovery_timeout(Duration::from_secs(60))
            .build()
            .unwrap();
        RetryExecutor::new(policy, Arc::new(CircuitBreaker::new("crm", config).unwrap()))
    }

    /// Validates a call failing twice with connection errors then succeeding.
    ///
    /// Assertions:
    /// - Confirms the value is returned after exactly three calls.
    /// - Confirms `successful_retries == 1` and `total_attempts == 3`.
    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let executor = executor(3, 10);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(CommonError::network("crm", "connection refused"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = executor.stats();
        assert_eq!(stats.successful_retries, 1);
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.failed_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let executor = executor(3, 10);
        let result: Result<(), _> = executor
            .execute(|| async { Err(CommonError::timeout("fetch", Duration::from_secs(1))) })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.error_type(), "TimeoutError");
        assert_eq!(executor.stats().failed_retries, 1);
        assert_eq!(executor.breaker().snapshot().failure_count, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let executor = executor(5, 10);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CommonError::validation("email", "malformed")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates breaker rejections are not failures.
    ///
    /// Assertions:
    /// - Confirms the call fails with `CircuitOpen` without invoking the
    ///   operation.
    /// - Confirms the rejection is counted and the breaker counters are
    ///   untouched.
    #[tokio::test]
    async fn test_open_breaker_rejects_without_consuming_budget() {
        let executor = executor(3, 1);
        executor.breaker().record_failure();
        assert_eq!(executor.breaker().state(), CircuitState::Open);
        let before = executor.breaker().snapshot();

        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<CommonError>> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(err.attempts(), 0);
        assert!(err.retry_after().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(executor.stats().circuit_breaker_rejections, 1);
        assert_eq!(executor.stats().total_attempts, 0);
        assert_eq!(executor.breaker().snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_loop_rejects_next_attempt() {
        let executor = executor(5, 2);
        let result: Result<(), _> = executor
            .execute(|| async { Err(CommonError::network("crm", "reset")) })
            .await;

        assert!(matches!(result, Err(RetryError::CircuitOpen { .. })));
        let stats = executor.stats();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.circuit_breaker_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable_timeout() {
        let executor = executor(2, 10).with_attempt_timeout(Duration::from_millis(50));
        let result: Result<(), RetryError<CommonError>> = executor
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::TimedOut { attempts: 2, .. }));
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(executor.breaker().snapshot().failure_count, 2);
    }

    /// Validates cancellation while waiting between attempts.
    ///
    /// Assertions:
    /// - Confirms the result is `Cancelled` with one completed attempt.
    /// - Confirms only the completed attempt was recorded on the breaker.
    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_wait_records_nothing_extra() {
        let executor = executor(5, 10);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result: Result<(), _> = executor
            .execute_with_cancellation(&token, || async {
                Err(CommonError::network("crm", "reset"))
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert_eq!(executor.breaker().snapshot().call_count, 1);
        assert_eq!(executor.stats().failed_retries, 0);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_skips_work() {
        let executor = executor(3, 10);
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), RetryError<CommonError>> =
            executor.execute_with_cancellation(&token, || async { Ok(()) }).await;
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0 })));
        assert_eq!(executor.stats().total_attempts, 0);
    }

    #[test]
    fn test_blocking_variant_shares_decisions() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(false)
            .build()
            .unwrap();
        let breaker = Arc::new(CircuitBreaker::new("db", CircuitBreakerConfig::default()).unwrap());
        let executor = RetryExecutor::new(policy, breaker);

        let mut calls = 0;
        let value = executor
            .execute_blocking(|| {
                calls += 1;
                if calls < 2 {
                    Err(CommonError::timeout("query", Duration::from_millis(1)))
                } else {
                    Ok("rows")
                }
            })
            .unwrap();
        assert_eq!(value, "rows");
        assert_eq!(executor.stats().successful_retries, 1);

        let err = executor
            .execute_blocking(|| Err::<(), _>(CommonError::permission_denied("drop table")))
            .unwrap_err();
        assert!(matches!(err, RetryError::NonRetryable { attempts: 1, .. }));

        executor.reset_stats();
        assert_eq!(executor.stats(), RetryStatsSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_delay() {
        let executor = executor(2, 10);
        let started = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let _ = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CommonError::external_api_with_retry(
                            "hubspot",
                            Some(429),
                            "slow down",
                            Duration::from_secs(2),
                        ))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
