//! # Keel Infrastructure
//!
//! Infrastructure implementations of core ports and process setup.
//!
//! This crate contains:
//! - Configuration loading (TOML/JSON file plus `KEEL_*` overrides)
//! - Retry store adapters (in-memory and JSON file)
//! - Tracing subscriber initialization
//! - Startup assembly of the resilience services
//!
//! ## Architecture
//! - Implements traits defined in `keel-core`
//! - Contains all "impure" code (file I/O, environment, global subscriber)

pub mod bootstrap;
pub mod config;
pub mod observability;
pub mod storage;

// Re-export commonly used items
pub use bootstrap::ResilienceContext;
pub use observability::init_tracing;
pub use storage::{InMemoryRetryStore, JsonFileRetryStore};
