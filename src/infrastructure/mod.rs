//! Infrastructure layer module
//!
//! Configuration loading, logging setup and daemon process management.
//! Adapters implementing the domain ports live in `crate::adapters`.

pub mod config;
pub mod logging;
pub mod process;
