//! Configuration loading
//!
//! Builds a validated [`keel_core::KeelConfig`] from an optional TOML or
//! JSON file plus `KEEL_*` environment overrides.

pub mod loader;

// Re-export commonly used items
pub use loader::{
    apply_env_overrides, apply_overrides, load, load_from_file, load_with_path, parse_config,
    probe_config_paths, CONFIG_PATH_ENV,
};
