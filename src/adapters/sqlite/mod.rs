//! SQLite persistence for the cross-run pattern store.

pub mod connection;
pub mod migrations;
pub mod pattern_store;

pub use connection::{
    create_pool, create_test_pool, database_url, verify_connection, ConnectionError, PoolConfig,
};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use pattern_store::SqlitePatternStore;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Errors from opening and migrating the pattern store.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Pool creation failed.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// A migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    /// A query failed.
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open the pool at `database_url` and apply pending migrations.
pub async fn initialize_database(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, config).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Open (creating if needed) and migrate the pattern store at `path`.
pub async fn open_pattern_store(path: &Path, config: Option<PoolConfig>) -> Result<SqlitePatternStore, DatabaseError> {
    let pool = initialize_database(&database_url(path), config).await?;
    Ok(SqlitePatternStore::new(pool))
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
