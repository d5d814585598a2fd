//! Infrastructure adapters for external systems.

pub mod fallback;
pub mod memory;
pub mod runtime;
pub mod scenarios;
pub mod sqlite;
