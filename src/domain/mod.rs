//! Domain layer for the merge-queue pipeline
//!
//! This module contains core models, errors, and the port traits external
//! collaborators implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
