//! `PatternStore` held in process memory. Nothing survives the process.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AntiPattern, AntiPatternScope, FixPattern, FixPatternKey};
use crate::domain::ports::PatternStore;

/// Pattern store kept in memory for a single process.
#[derive(Debug, Default)]
pub struct InMemoryPatternStore {
    fixes: RwLock<HashMap<FixPatternKey, FixPattern>>,
    anti_patterns: RwLock<Vec<AntiPattern>>,
}

impl InMemoryPatternStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of anti-patterns stored so far.
    pub async fn anti_pattern_count(&self) -> usize {
        self.anti_patterns.read().await.len()
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn get_known_fix(&self, key: &FixPatternKey) -> DomainResult<Option<FixPattern>> {
        Ok(self.fixes.read().await.get(key).cloned())
    }

    async fn put_successful_fix(&self, pattern: &FixPattern) -> DomainResult<()> {
        let mut fixes = self.fixes.write().await;
        let increment = pattern.success_count.max(1);
        match fixes.get_mut(&pattern.key) {
            Some(existing) => {
                existing.strategy_type = pattern.strategy_type;
                existing.fix_type = pattern.fix_type;
                existing.target_file.clone_from(&pattern.target_file);
                existing.old_fragment.clone_from(&pattern.old_fragment);
                existing.new_fragment.clone_from(&pattern.new_fragment);
                existing.success_count += increment;
                existing.updated_at = Utc::now();
            }
            None => {
                let mut stored = pattern.clone();
                stored.success_count = increment;
                stored.updated_at = Utc::now();
                fixes.insert(pattern.key.clone(), stored);
            }
        }
        Ok(())
    }

    async fn record_failed_fix(&self, key: &FixPatternKey) -> DomainResult<()> {
        if let Some(existing) = self.fixes.write().await.get_mut(key) {
            existing.failure_count += 1;
            existing.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_anti_patterns(&self, scope: &AntiPatternScope) -> DomainResult<Vec<AntiPattern>> {
        Ok(self
            .anti_patterns
            .read()
            .await
            .iter()
            .filter(|ap| &ap.scope == scope)
            .cloned()
            .collect())
    }

    async fn put_anti_pattern(&self, anti_pattern: &AntiPattern) -> DomainResult<()> {
        let mut stored = self.anti_patterns.write().await;
        match stored
            .iter_mut()
            .find(|ap| ap.scope == anti_pattern.scope && ap.wrong_fragment == anti_pattern.wrong_fragment)
        {
            Some(existing) => {
                existing.correct_fragment.clone_from(&anti_pattern.correct_fragment);
                existing.description.clone_from(&anti_pattern.description);
                existing.target_file.clone_from(&anti_pattern.target_file);
            }
            None => stored.push(anti_pattern.clone()),
        }
        Ok(())
    }

    async fn increment_prevented(&self, id: Uuid) -> DomainResult<()> {
        if let Some(ap) = self.anti_patterns.write().await.iter_mut().find(|ap| ap.id == id) {
            ap.prevented_count += 1;
        }
        Ok(())
    }

    async fn list_known_fixes(&self, limit: usize) -> DomainResult<Vec<FixPattern>> {
        let mut fixes: Vec<FixPattern> = self.fixes.read().await.values().cloned().collect();
        fixes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        fixes.truncate(limit);
        Ok(fixes)
    }
}
