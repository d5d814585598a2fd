//! In-memory adapters for tests and store-less runs.

pub mod pattern_store;

pub use pattern_store::InMemoryPatternStore;
