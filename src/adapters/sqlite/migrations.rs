//! Embedded schema migrations for the pattern store.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

/// Failure while bringing the schema up to date.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration statement failed; `version` 0 is the bookkeeping table.
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError {
        /// Migration that failed.
        version: i64,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },
    /// The recorded schema version could not be read.
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
}

/// One versioned schema change.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Monotonic version; applied when greater than the recorded one.
    pub version: i64,
    /// Stored alongside the version in `schema_migrations`.
    pub description: String,
    /// Statements executed in a single transaction.
    pub sql: String,
}

/// Applies [`Migration`]s to a pool and records them in `schema_migrations`.
pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    /// Migrator over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply every migration newer than the recorded schema version. Returns
    /// how many ran.
    pub async fn run_embedded_migrations(&self, migrations: Vec<Migration>) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.get_current_version().await?;
        let pending: Vec<_> = migrations.into_iter().filter(|m| m.version > current_version).collect();

        for migration in &pending {
            self.apply_migration(migration).await?;
            info!(version = migration.version, description = %migration.description, "Applied migration");
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;
        Ok(())
    }

    /// Highest applied version, or 0 on a fresh database.
    pub async fn get_current_version(&self) -> Result<i64, MigrationError> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::VersionCheckError)?;
        Ok(result.map_or(0, |(v,)| v))
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), MigrationError> {
        let to_error = |e| MigrationError::ExecutionError { version: migration.version, source: e };
        let mut tx = self.pool.begin().await.map_err(to_error)?;
        sqlx::raw_sql(&migration.sql).execute(&mut *tx).await.map_err(to_error)?;
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(&migration.description)
            .execute(&mut *tx)
            .await
            .map_err(to_error)?;
        tx.commit().await.map_err(to_error)
    }
}

/// Known-fix and anti-pattern tables.
pub fn pattern_store_migration() -> Migration {
    Migration {
        version: 1,
        description: "Known fixes and anti-patterns".to_string(),
        sql: include_str!("../../../migrations/001_pattern_store.sql").to_string(),
    }
}

/// Every migration compiled into the binary, oldest first.
pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![pattern_store_migration()]
}
