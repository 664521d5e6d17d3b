//! Configuration loader
//!
//! ## Loading Strategy
//! 1. An explicit path passed by the caller
//! 2. The path named by `KEEL_CONFIG`
//! 3. The first existing probe path (see [`probe_config_paths`])
//! 4. Built-in defaults when no file is found
//!
//! `KEEL_*` environment overrides are applied on top of whichever source
//! won, and the result is validated before it is returned.
//!
//! ## Environment Variables
//! - `KEEL_CONFIG`: Config file path
//! - `KEEL_LOG_LEVEL`: Log filter directive (e.g. `debug`)
//! - `KEEL_LOG_JSON`: Emit JSON log lines (true/false)
//! - `KEEL_RETRY_MAX_ATTEMPTS`: Default retry attempts
//! - `KEEL_RETRY_BASE_DELAY_MS`: Default retry base delay in milliseconds
//! - `KEEL_RETRY_MAX_DELAY_MS`: Default retry delay cap in milliseconds
//! - `KEEL_RETRY_JITTER`: Whether retry delays are jittered (true/false)
//! - `KEEL_BREAKER_FAILURE_THRESHOLD`: Failures that open a breaker
//! - `KEEL_BREAKER_RECOVERY_TIMEOUT_SECS`: Open-state cooldown in seconds
//! - `KEEL_MAX_ERROR_THRESHOLD`: Batch failure ratio that stops a batch
//! - `KEEL_MAX_ERROR_HISTORY`: Aggregator history capacity
//! - `KEEL_SWEEP_INTERVAL_SECS`: Scheduler sweep interval in seconds
//! - `KEEL_MAX_CONCURRENCY`: Concurrent redeliveries per sweep

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use keel_core::KeelConfig;
use keel_domain::{KeelError, Result};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "KEEL_CONFIG";

/// Load configuration with the full fallback chain and no explicit path
///
/// # Errors
/// Returns `KeelError::Config` if a named file is missing or malformed, an
/// override cannot be parsed, or the final configuration is invalid.
pub fn load() -> Result<KeelConfig> {
    load_with_path(None)
}

/// Load configuration, preferring `path` over every other source
///
/// # Errors
/// Returns `KeelError::Config` if:
/// - `path` or `KEEL_CONFIG` names a file that does not exist
/// - The file format is invalid
/// - An environment override has an invalid value
/// - The resulting configuration fails validation
pub fn load_with_path(path: Option<PathBuf>) -> Result<KeelConfig> {
    let explicit = path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

    let mut config = match explicit {
        Some(path) => load_from_file(&path)?,
        None => match probe_config_paths() {
            Some(path) => load_from_file(&path)?,
            None => {
                tracing::info!("No config file found, using defaults");
                KeelConfig::default()
            }
        },
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Read and parse one config file
///
/// Format is chosen by extension. No overrides are applied and the result
/// is not validated.
///
/// # Errors
/// Returns `KeelError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: &Path) -> Result<KeelConfig> {
    if !path.exists() {
        return Err(KeelError::Config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| KeelError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration from string content
///
/// `.toml` files are parsed as TOML, everything else as JSON.
///
/// # Errors
/// Returns `KeelError::Config` if parsing fails.
pub fn parse_config(contents: &str, path: &Path) -> Result<KeelConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| KeelError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| KeelError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(KeelError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe standard locations for a config file
///
/// Searches, in order:
/// 1. `./keel.toml`, `./config/keel.toml`, `./keel.json`, `./config/keel.json`
/// 2. The same names next to the running executable
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["keel.toml", "config/keel.toml", "keel.json", "config/keel.json"];

    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(NAMES.iter().map(|name| cwd.join(name)));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(NAMES.iter().map(|name| exe_dir.join(name)));
        }
    }

    candidates.into_iter().find(|path| path.is_file())
}

/// Apply `KEEL_*` overrides from the process environment
///
/// # Errors
/// Returns `KeelError::Config` naming the variable with an unparsable value.
pub fn apply_env_overrides(config: &mut KeelConfig) -> Result<()> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply `KEEL_*` overrides read through `lookup`
///
/// Unset variables leave the corresponding field untouched.
///
/// # Errors
/// Returns `KeelError::Config` naming the variable with an unparsable value.
pub fn apply_overrides<F>(config: &mut KeelConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Overrides { lookup };

    if let Some(level) = env.raw("KEEL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env.flag("KEEL_LOG_JSON") {
        config.logging.json = json;
    }

    if let Some(attempts) = env.parsed("KEEL_RETRY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = attempts;
    }
    if let Some(millis) = env.parsed("KEEL_RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay = Duration::from_millis(millis);
    }
    if let Some(millis) = env.parsed("KEEL_RETRY_MAX_DELAY_MS")? {
        config.retry.max_delay = Duration::from_millis(millis);
    }
    if let Some(jitter) = env.flag("KEEL_RETRY_JITTER") {
        config.retry.jitter = jitter;
    }

    if let Some(threshold) = env.parsed("KEEL_BREAKER_FAILURE_THRESHOLD")? {
        config.circuit_breaker.failure_threshold = threshold;
    }
    if let Some(secs) = env.parsed("KEEL_BREAKER_RECOVERY_TIMEOUT_SECS")? {
        config.circuit_breaker.recovery_timeout = Duration::from_secs(secs);
    }

    if let Some(threshold) = env.parsed("KEEL_MAX_ERROR_THRESHOLD")? {
        config.propagation.max_error_threshold = threshold;
    }
    if let Some(history) = env.parsed("KEEL_MAX_ERROR_HISTORY")? {
        config.aggregator.max_history = history;
    }

    if let Some(secs) = env.parsed("KEEL_SWEEP_INTERVAL_SECS")? {
        config.scheduler.sweep_interval = Duration::from_secs(secs);
    }
    if let Some(concurrency) = env.parsed("KEEL_MAX_CONCURRENCY")? {
        config.scheduler.max_concurrency = concurrency;
    }

    Ok(())
}

struct Overrides<F> {
    lookup: F,
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.raw(key)
            .map(|value| {
                value.parse::<T>().map_err(|e| KeelError::Config(format!("Invalid {key}='{value}': {e}")))
            })
            .transpose()
    }

    /// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off`
    /// (case-insensitive); anything else counts as false
    fn flag(&self, key: &str) -> Option<bool> {
        self.raw(key)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }
}
