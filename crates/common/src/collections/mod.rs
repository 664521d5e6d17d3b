//! Specialized data structures
//!
//! - **[`bounded_window`]**: insertion-ordered history that evicts its oldest
//!   entries once full. Backs the circuit breaker outcome window and the
//!   error aggregator history.

pub mod bounded_window;

pub use bounded_window::BoundedWindow;
