//! In-memory version store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::{TableName, VersionStore};
use crate::error::{MigrationError, MigrationResult};

/// Version table kept in process memory
///
/// Each table maps the `version` primary key to the owning name, so a
/// second insert of the same version fails exactly like a real table would.
/// Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    tables: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every `(version, name)` row in `table`, ordered by version
    pub fn rows(&self, table: &TableName) -> Vec<(String, String)> {
        self.tables
            .read()
            .get(table.as_str())
            .map(|rows| rows.iter().map(|(v, n)| (v.clone(), n.clone())).collect())
            .unwrap_or_default()
    }

    fn missing_table(table: &TableName) -> MigrationError {
        MigrationError::persistence(format!("relation \"{}\" does not exist", table))
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn table_exists(&self, table: &TableName) -> MigrationResult<bool> {
        Ok(self.tables.read().contains_key(table.as_str()))
    }

    async fn create_table(&self, table: &TableName) -> MigrationResult<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(table.as_str()) {
            return Err(MigrationError::persistence(format!(
                "relation \"{}\" already exists",
                table
            )));
        }
        tables.insert(table.as_str().to_string(), BTreeMap::new());
        Ok(())
    }

    async fn migrated_versions(
        &self,
        table: &TableName,
        name: &str,
    ) -> MigrationResult<Vec<String>> {
        let tables = self.tables.read();
        let rows = tables
            .get(table.as_str())
            .ok_or_else(|| Self::missing_table(table))?;

        Ok(rows
            .iter()
            .filter(|(_, owner)| owner.as_str() == name)
            .map(|(version, _)| version.clone())
            .collect())
    }

    async fn is_migrated(
        &self,
        table: &TableName,
        name: &str,
        version: &str,
    ) -> MigrationResult<bool> {
        let tables = self.tables.read();
        let rows = tables
            .get(table.as_str())
            .ok_or_else(|| Self::missing_table(table))?;

        Ok(rows.get(version).map_or(false, |owner| owner == name))
    }

    async fn latest_migrated(
        &self,
        table: &TableName,
        name: &str,
        candidates: &[String],
    ) -> MigrationResult<Option<String>> {
        let tables = self.tables.read();
        let rows = tables
            .get(table.as_str())
            .ok_or_else(|| Self::missing_table(table))?;

        Ok(rows
            .iter()
            .rev()
            .find(|(version, owner)| owner.as_str() == name && candidates.contains(version))
            .map(|(version, _)| version.clone()))
    }

    async fn count_migrated(&self, table: &TableName, name: &str) -> MigrationResult<u64> {
        let tables = self.tables.read();
        let rows = tables
            .get(table.as_str())
            .ok_or_else(|| Self::missing_table(table))?;

        Ok(rows.values().filter(|owner| owner.as_str() == name).count() as u64)
    }

    async fn insert_version(
        &self,
        table: &TableName,
        name: &str,
        version: &str,
    ) -> MigrationResult<()> {
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table.as_str())
            .ok_or_else(|| Self::missing_table(table))?;

        if rows.contains_key(version) {
            return Err(MigrationError::persistence(format!(
                "duplicate key value violates unique constraint \"{}_pkey\": version {}",
                table, version
            )));
        }
        rows.insert(version.to_string(), name.to_string());
        Ok(())
    }

    async fn delete_version(
        &self,
        table: &TableName,
        name: &str,
        version: &str,
    ) -> MigrationResult<u64> {
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table.as_str())
            .ok_or_else(|| Self::missing_table(table))?;

        match rows.get(version) {
            Some(owner) if owner == name => {
                rows.remove(version);
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}
