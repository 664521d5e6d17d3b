//! [`keel_core::RetryStore`] adapters

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileRetryStore;
pub use memory::InMemoryRetryStore;
