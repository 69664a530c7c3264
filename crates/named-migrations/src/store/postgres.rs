//! Postgres version store backed by a sqlx pool
//!
//! Values are always bound as `$n` parameters. Only the table name is placed
//! into the SQL text, always quoted so its case survives and matches the
//! exact name looked up in `information_schema`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{TableName, VersionStore, NAME_COLUMN, VERSION_COLUMN};
use crate::error::{MigrationError, MigrationResult};

/// Version store talking to Postgres through a connection pool
#[derive(Debug, Clone)]
pub struct PgVersionStore {
    pool: PgPool,
}

impl PgVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool from a database URL
    pub async fn connect(database_url: &str) -> MigrationResult<Self> {
        let pool = PgPool::connect(database_url).await.map_err(|e| {
            MigrationError::persistence_with_source("Failed to connect to database", e)
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// SQL to check for the version table in the current schema
    pub fn table_exists_sql() -> &'static str {
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1)"
    }

    /// SQL to create the version table
    pub fn create_table_sql(table: &TableName) -> String {
        format!(
            "CREATE TABLE {} (\n    \
                {} VARCHAR(255) NOT NULL PRIMARY KEY,\n    \
                {} VARCHAR(255) NOT NULL\n\
            )",
            table.quoted(), VERSION_COLUMN, NAME_COLUMN
        )
    }

    /// SQL to list versions recorded for a name
    pub fn migrated_versions_sql(table: &TableName) -> String {
        format!(
            "SELECT {v} FROM {t} WHERE {n} = $1 ORDER BY {v} ASC",
            t = table.quoted(),
            v = VERSION_COLUMN,
            n = NAME_COLUMN
        )
    }

    /// SQL to look up a single `(version, name)` row
    pub fn is_migrated_sql(table: &TableName) -> String {
        format!(
            "SELECT {v} FROM {t} WHERE {v} = $1 AND {n} = $2",
            t = table.quoted(),
            v = VERSION_COLUMN,
            n = NAME_COLUMN
        )
    }

    /// SQL selecting the greatest recorded version among a candidate set
    pub fn latest_migrated_sql(table: &TableName) -> String {
        format!(
            "SELECT {v} FROM {t} WHERE {n} = $1 AND {v} = ANY($2) ORDER BY {v} DESC LIMIT 1",
            t = table.quoted(),
            v = VERSION_COLUMN,
            n = NAME_COLUMN
        )
    }

    /// SQL counting the versions recorded for a name
    pub fn count_migrated_sql(table: &TableName) -> String {
        format!(
            "SELECT COUNT({v}) FROM {t} WHERE {n} = $1",
            t = table.quoted(),
            v = VERSION_COLUMN,
            n = NAME_COLUMN
        )
    }

    /// SQL recording a version as applied
    pub fn insert_version_sql(table: &TableName) -> String {
        format!(
            "INSERT INTO {t} ({v}, {n}) VALUES ($1, $2)",
            t = table.quoted(),
            v = VERSION_COLUMN,
            n = NAME_COLUMN
        )
    }

    /// SQL removing a version record
    pub fn delete_version_sql(table: &TableName) -> String {
        format!(
            "DELETE FROM {t} WHERE {v} = $1 AND {n} = $2",
            t = table.quoted(),
            v = VERSION_COLUMN,
            n = NAME_COLUMN
        )
    }
}

#[async_trait]
impl VersionStore for PgVersionStore {
    async fn table_exists(&self, table: &TableName) -> MigrationResult<bool> {
        let row = sqlx::query(Self::table_exists_sql())
            .bind(table.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn create_table(&self, table: &TableName) -> MigrationResult<()> {
        sqlx::query(&Self::create_table_sql(table))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MigrationError::persistence_with_source(
                    format!("Failed to create migrations table {}", table),
                    e,
                )
            })?;
        Ok(())
    }

    async fn migrated_versions(
        &self,
        table: &TableName,
        name: &str,
    ) -> MigrationResult<Vec<String>> {
        let rows = sqlx::query(&Self::migrated_versions_sql(table))
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            versions.push(row.try_get::<String, _>(VERSION_COLUMN)?);
        }
        Ok(versions)
    }

    async fn is_migrated(
        &self,
        table: &TableName,
        name: &str,
        version: &str,
    ) -> MigrationResult<bool> {
        let row = sqlx::query(&Self::is_migrated_sql(table))
            .bind(version)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn latest_migrated(
        &self,
        table: &TableName,
        name: &str,
        candidates: &[String],
    ) -> MigrationResult<Option<String>> {
        let row = sqlx::query(&Self::latest_migrated_sql(table))
            .bind(name)
            .bind(candidates)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>(VERSION_COLUMN)?)),
            None => Ok(None),
        }
    }

    async fn count_migrated(&self, table: &TableName, name: &str) -> MigrationResult<u64> {
        let row = sqlx::query(&Self::count_migrated_sql(table))
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn insert_version(
        &self,
        table: &TableName,
        name: &str,
        version: &str,
    ) -> MigrationResult<()> {
        sqlx::query(&Self::insert_version_sql(table))
            .bind(version)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MigrationError::persistence_with_source(
                    format!("Failed to record migration {} for {}", version, name),
                    e,
                )
            })?;
        Ok(())
    }

    async fn delete_version(
        &self,
        table: &TableName,
        name: &str,
        version: &str,
    ) -> MigrationResult<u64> {
        let result = sqlx::query(&Self::delete_version_sql(table))
            .bind(version)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
