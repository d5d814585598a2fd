//! `ScenarioSource` adapters: a catalog file or the application IR.

pub mod file;
pub mod ir;

pub use file::FileScenarioSource;
pub use ir::{load_ir, IrScenarioSource};

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::domain::errors::DomainResult;

/// Parse JSON for `.json` files and YAML for everything else.
pub(crate) fn parse_document<T: DeserializeOwned>(path: &Path, content: &str) -> DomainResult<T> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}
