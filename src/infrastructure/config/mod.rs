//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment: YAML files under `.refinery/`
//! with `REFINERY_*` environment overrides, validated after extraction.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
