//! Domain constants
//!
//! Defaults shared by the aggregator, batch processing and the retry
//! scheduler.

// Error history
pub const DEFAULT_MAX_ERROR_HISTORY: usize = 10_000;
pub const DEFAULT_MAX_BATCH_HISTORY: usize = 1_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// Pattern detection
pub const MAX_PATTERN_SAMPLES: usize = 5;
pub const TOP_ERROR_TYPES: usize = 10;
pub const SUMMARY_TOP_ENTRIES: usize = 5;
/// Written in place of a context value that differs between occurrences
pub const VARIES_SENTINEL: &str = "<varies>";

// Alert defaults (per-hour window)
pub const ALERT_ERROR_RATE_WARNING: f64 = 10.0;
pub const ALERT_ERROR_RATE_CRITICAL: f64 = 25.0;
pub const ALERT_ERROR_COUNT_WARNING: f64 = 100.0;
pub const ALERT_WINDOW_SECS: u64 = 3_600;

// Retry scheduler
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT_REDELIVERIES: usize = 5;
pub const DEFAULT_PAYMENT_DESTINATIONS: [&str; 4] = ["stripe", "paypal", "square", "braintree"];
/// Lowercase substrings in error text that raise a retry to High priority
pub const TRANSIENT_ERROR_MARKERS: [&str; 6] =
    ["timeout", "timed out", "network", "connection", "unreachable", "reset by peer"];
