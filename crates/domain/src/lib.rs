//! # Keel Domain
//!
//! Data model shared by the Keel resilience core.
//!
//! This crate contains:
//! - Failure observations (`ErrorRecord`) and batch outcomes (`BatchResult`)
//! - Derived analysis types (`ErrorPattern`, `ErrorMetrics`, alerts)
//! - Delayed redelivery items and event records
//! - Domain error types and Result definitions
//! - Domain constants
//!
//! ## Architecture
//! - Depends only on the foundation tier of `keel-common`
//! - No async runtime, no I/O
//! - Pure data structures with their invariants

pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
