//! SQLite implementation of the `PatternStore`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::PathBuf;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AntiPattern, AntiPatternScope, FixPattern, FixPatternKey};
use crate::domain::ports::PatternStore;

/// Pattern store persisted in SQLite.
#[derive(Clone)]
pub struct SqlitePatternStore {
    pool: SqlitePool,
}

impl SqlitePatternStore {
    /// Store over an already-migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FixPatternRow {
    error_kind: String,
    endpoint: String,
    exception_kind: String,
    strategy_type: String,
    fix_type: String,
    target_file: String,
    old_fragment: String,
    new_fragment: String,
    success_count: i64,
    failure_count: i64,
    updated_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AntiPatternRow {
    id: String,
    scope_kind: String,
    scope_value: String,
    wrong_fragment: String,
    correct_fragment: String,
    description: String,
    target_file: Option<String>,
    prevented_count: i64,
    created_at: String,
}

fn count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn row_to_pattern(row: FixPatternRow) -> DomainResult<FixPattern> {
    Ok(FixPattern {
        key: FixPatternKey {
            error_kind: row.error_kind,
            endpoint: row.endpoint,
            exception_kind: row.exception_kind,
        },
        strategy_type: row.strategy_type.parse().map_err(DomainError::SerializationError)?,
        fix_type: row.fix_type.parse().map_err(DomainError::SerializationError)?,
        target_file: PathBuf::from(row.target_file),
        old_fragment: row.old_fragment,
        new_fragment: row.new_fragment,
        success_count: count(row.success_count),
        failure_count: count(row.failure_count),
        updated_at: parse_datetime(&row.updated_at)?,
    })
}

fn row_to_anti_pattern(row: AntiPatternRow) -> DomainResult<AntiPattern> {
    let scope = AntiPatternScope::from_parts(&row.scope_kind, row.scope_value).ok_or_else(|| {
        DomainError::SerializationError(format!("Unknown anti-pattern scope: {}", row.scope_kind))
    })?;
    Ok(AntiPattern {
        id: parse_uuid(&row.id)?,
        scope,
        wrong_fragment: row.wrong_fragment,
        correct_fragment: row.correct_fragment,
        description: row.description,
        target_file: row.target_file.map(PathBuf::from),
        prevented_count: count(row.prevented_count),
        created_at: parse_datetime(&row.created_at)?,
    })
}

#[async_trait]
impl PatternStore for SqlitePatternStore {
    async fn get_known_fix(&self, key: &FixPatternKey) -> DomainResult<Option<FixPattern>> {
        let row: Option<FixPatternRow> = sqlx::query_as(
            "SELECT * FROM fix_patterns WHERE error_kind = ? AND endpoint = ? AND exception_kind = ?",
        )
        .bind(&key.error_kind)
        .bind(&key.endpoint)
        .bind(&key.exception_kind)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_pattern).transpose()
    }

    async fn put_successful_fix(&self, pattern: &FixPattern) -> DomainResult<()> {
        // The replacement fragments always track the latest success.
        sqlx::query(
            r"INSERT INTO fix_patterns
               (error_kind, endpoint, exception_kind, strategy_type, fix_type, target_file,
                old_fragment, new_fragment, success_count, failure_count, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (error_kind, endpoint, exception_kind) DO UPDATE SET
                strategy_type = excluded.strategy_type,
                fix_type = excluded.fix_type,
                target_file = excluded.target_file,
                old_fragment = excluded.old_fragment,
                new_fragment = excluded.new_fragment,
                success_count = fix_patterns.success_count + excluded.success_count,
                updated_at = excluded.updated_at",
        )
        .bind(&pattern.key.error_kind)
        .bind(&pattern.key.endpoint)
        .bind(&pattern.key.exception_kind)
        .bind(pattern.strategy_type.as_str())
        .bind(pattern.fix_type.as_str())
        .bind(pattern.target_file.to_string_lossy().into_owned())
        .bind(&pattern.old_fragment)
        .bind(&pattern.new_fragment)
        .bind(i64::from(pattern.success_count.max(1)))
        .bind(i64::from(pattern.failure_count))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_failed_fix(&self, key: &FixPatternKey) -> DomainResult<()> {
        // Failures for keys without a stored fix have nothing to count against.
        sqlx::query(
            r"UPDATE fix_patterns
               SET failure_count = failure_count + 1, updated_at = ?
               WHERE error_kind = ? AND endpoint = ? AND exception_kind = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&key.error_kind)
        .bind(&key.endpoint)
        .bind(&key.exception_kind)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_anti_patterns(&self, scope: &AntiPatternScope) -> DomainResult<Vec<AntiPattern>> {
        let rows: Vec<AntiPatternRow> = sqlx::query_as(
            "SELECT * FROM anti_patterns WHERE scope_kind = ? AND scope_value = ? ORDER BY created_at",
        )
        .bind(scope.kind_name())
        .bind(scope.value())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_anti_pattern).collect()
    }

    async fn put_anti_pattern(&self, anti_pattern: &AntiPattern) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO anti_patterns
               (id, scope_kind, scope_value, wrong_fragment, correct_fragment, description,
                target_file, prevented_count, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (scope_kind, scope_value, wrong_fragment) DO UPDATE SET
                correct_fragment = excluded.correct_fragment,
                description = excluded.description,
                target_file = excluded.target_file",
        )
        .bind(anti_pattern.id.to_string())
        .bind(anti_pattern.scope.kind_name())
        .bind(anti_pattern.scope.value())
        .bind(&anti_pattern.wrong_fragment)
        .bind(&anti_pattern.correct_fragment)
        .bind(&anti_pattern.description)
        .bind(anti_pattern.target_file.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(i64::from(anti_pattern.prevented_count))
        .bind(anti_pattern.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_prevented(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("UPDATE anti_patterns SET prevented_count = prevented_count + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_known_fixes(&self, limit: usize) -> DomainResult<Vec<FixPattern>> {
        let rows: Vec<FixPatternRow> = sqlx::query_as(
            "SELECT * FROM fix_patterns ORDER BY updated_at DESC, success_count DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_pattern).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{FixType, StrategyType};

    async fn store() -> SqlitePatternStore {
        SqlitePatternStore::new(create_migrated_test_pool().await.unwrap())
    }

    fn pattern(new_fragment: &str) -> FixPattern {
        FixPattern {
            key: FixPatternKey::new("HTTPError", "/products", Some("IntegrityError")),
            strategy_type: StrategyType::Database,
            fix_type: FixType::MakeNullable,
            target_file: "app/models/product.py".into(),
            old_fragment: "description = Column(String, nullable=False)".to_string(),
            new_fragment: new_fragment.to_string(),
            success_count: 1,
            failure_count: 0,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successes_accumulate_under_one_key() {
        let store = store().await;
        store.put_successful_fix(&pattern("description = Column(String, nullable=True)")).await.unwrap();
        store.put_successful_fix(&pattern("description = Column(String, nullable=True, default='')")).await.unwrap();
        store.record_failed_fix(&pattern("").key).await.unwrap();

        let found = store.get_known_fix(&pattern("").key).await.unwrap().unwrap();
        assert_eq!(found.success_count, 2);
        assert_eq!(found.failure_count, 1);
        assert!(found.new_fragment.contains("default=''"));
        assert_eq!(found.fix_type, FixType::MakeNullable);
    }

    #[tokio::test]
    async fn failure_without_stored_fix_is_ignored() {
        let store = store().await;
        let key = FixPatternKey::new("HTTPError", "/orders", None);
        store.record_failed_fix(&key).await.unwrap();
        assert!(store.get_known_fix(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn anti_patterns_are_scoped_and_counted() {
        let store = store().await;
        let ap = AntiPattern::new(
            AntiPatternScope::Endpoint("/carts/{id}/items".to_string()),
            "if product.stock < 0:",
            "",
            "stock guard regressed checkout",
        )
        .with_target_file("app/services/cart_service.py");
        store.put_anti_pattern(&ap).await.unwrap();
        store.increment_prevented(ap.id).await.unwrap();

        let found = store
            .get_anti_patterns(&AntiPatternScope::Endpoint("/carts/{id}/items".to_string()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].prevented_count, 1);
        assert_eq!(found[0].target_file.as_deref(), Some(std::path::Path::new("app/services/cart_service.py")));

        let other = store
            .get_anti_patterns(&AntiPatternScope::Entity("/carts/{id}/items".to_string()))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn list_returns_most_recent_first() {
        let store = store().await;
        let mut popular = pattern("x");
        popular.key = FixPatternKey::new("HTTPError", "/orders", None);
        store.put_successful_fix(&pattern("y")).await.unwrap();
        store.put_successful_fix(&popular).await.unwrap();
        store.put_successful_fix(&popular).await.unwrap();

        let listed = store.list_known_fixes(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key.endpoint, "/orders");
        assert_eq!(store.list_known_fixes(1).await.unwrap().len(), 1);
    }
}
