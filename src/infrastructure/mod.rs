//! Infrastructure layer module
//!
//! Ambient concerns that are not domain ports:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)

pub mod config;
pub mod logging;
