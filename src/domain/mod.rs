//! Domain layer for the Patchloop repair engine
//!
//! This module contains core data models and the port traits external
//! collaborators implement.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{DomainError, DomainResult};
