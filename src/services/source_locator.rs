//! Finds the files a repair should target in a generated FastAPI /
//! SQLAlchemy / Pydantic service: models, schemas, routers, services.

use std::collections::BTreeMap;

use regex::Regex;

use crate::domain::models::ir::{infer_entity_from_path, to_snake_case};
use crate::services::repair_procedures::source_edit::{classes, functions};

/// In-memory index of the application's Python sources.
#[derive(Debug, Clone, Default)]
pub struct SourceLocator {
    sources: BTreeMap<String, String>,
}

impl SourceLocator {
    /// Locator over `(relative path, contents)` pairs.
    pub fn new(sources: BTreeMap<String, String>) -> Self {
        Self { sources }
    }

    /// Contents of `path`, if loaded.
    pub fn source(&self, path: &str) -> Option<&str> {
        self.sources.get(path).map(String::as_str)
    }

    /// Loaded paths, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    fn declares_class(source: &str, name: &str) -> bool {
        classes(source).iter().any(|c| c.name == name)
    }

    fn is_orm_module(source: &str) -> bool {
        ["Column(", "mapped_column(", "__tablename__", "table=True"]
            .iter()
            .any(|m| source.contains(m))
    }

    /// Prefer paths containing `hint` among `matches`.
    fn prefer(matches: Vec<&String>, hint: &str) -> Option<String> {
        matches
            .iter()
            .find(|p| p.contains(hint))
            .or_else(|| matches.first())
            .map(|p| (*p).clone())
    }

    /// File declaring the ORM class for `entity`.
    pub fn model_file(&self, entity: &str) -> Option<String> {
        let matches: Vec<&String> = self
            .sources
            .iter()
            .filter(|(_, src)| Self::is_orm_module(src) && Self::declares_class(src, entity))
            .map(|(p, _)| p)
            .collect();
        Self::prefer(matches, "model")
    }

    /// File declaring the request schemas for `entity`.
    pub fn schema_file(&self, entity: &str) -> Option<String> {
        let names = ["Create", "Base", "In", "Update", "Request"].map(|s| format!("{entity}{s}"));
        let matches: Vec<&String> = self
            .sources
            .iter()
            .filter(|(_, src)| {
                src.contains("BaseModel") && names.iter().any(|n| Self::declares_class(src, n))
            })
            .map(|(p, _)| p)
            .collect();
        Self::prefer(matches, "schema")
    }

    /// Router module most likely to own `path`.
    pub fn route_file(&self, path: &str) -> Option<String> {
        let segment = path
            .split('/')
            .find(|s| !s.is_empty() && !s.starts_with('{') && *s != "api" && !is_version(s))?
            .to_string();
        let singular = infer_entity_from_path(path)
            .map(|e| to_snake_case(&e))
            .unwrap_or_else(|| segment.clone());
        let prefix = Regex::new(&format!(
            r#"prefix\s*=\s*["'](?:/api)?(?:/v\d+)?/{}["']"#,
            regex::escape(&segment)
        ))
        .ok()?;
        let decorator = format!("(\"/{segment}");

        let mut best: Option<(u8, &String)> = None;
        for (p, src) in &self.sources {
            if !src.contains("APIRouter(") && !src.contains("FastAPI(") {
                continue;
            }
            let file_name = p.rsplit('/').next().unwrap_or(p);
            let score = if prefix.is_match(src) {
                3
            } else if src.contains(&decorator) {
                2
            } else if file_name.contains(&segment) || file_name.contains(&singular) {
                1
            } else {
                0
            };
            if score > 0 && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, p));
            }
        }
        best.map(|(_, p)| p.clone())
            .or_else(|| self.main_file())
    }

    /// Module creating the `FastAPI()` application.
    pub fn main_file(&self) -> Option<String> {
        self.sources
            .iter()
            .find(|(_, src)| src.contains("FastAPI("))
            .map(|(p, _)| p.clone())
    }

    /// Service module for `entity`.
    pub fn service_file(&self, entity: &str) -> Option<String> {
        let snake = to_snake_case(entity);
        let class_name = format!("{entity}Service");
        self.sources
            .keys()
            .find(|p| p.contains("service") && p.contains(&snake))
            .or_else(|| {
                self.sources
                    .iter()
                    .find(|(_, src)| Self::declares_class(src, &class_name))
                    .map(|(p, _)| p)
            })
            .cloned()
    }

    /// First file (service modules first) defining a function named like one
    /// of `names`. Returns `(path, function)`.
    pub fn function_file(&self, names: &[String]) -> Option<(String, String)> {
        let mut ordered: Vec<(&String, &String)> = self.sources.iter().collect();
        ordered.sort_by_key(|(p, _)| !p.contains("service"));
        for name in names {
            for (p, src) in &ordered {
                if let Some(f) = functions(src).into_iter().find(|f| &f.name == name) {
                    return Some(((*p).clone(), f.name));
                }
            }
        }
        None
    }

    /// Map a trace path onto an indexed file by longest matching suffix.
    pub fn resolve(&self, reported: &str) -> Option<String> {
        let normalized = reported.replace('\\', "/");
        let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
        (0..parts.len()).find_map(|start| {
            let suffix = parts[start..].join("/");
            self.sources.contains_key(&suffix).then_some(suffix)
        })
    }
}

fn is_version(s: &str) -> bool {
    s.len() > 1 && s.starts_with('v') && s[1..].chars().all(|c| c.is_ascii_digit())
}
