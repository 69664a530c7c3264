//! Version table storage
//!
//! All reads and writes against the shared version table go through a
//! [`VersionStore`]. Rows are `(version, name)` pairs; `version` is the
//! primary key of the physical table.

pub mod memory;
pub mod postgres;

pub use memory::*;
pub use postgres::*;

use async_trait::async_trait;
use std::fmt;

use crate::error::{MigrationError, MigrationResult};

/// Column holding the migration version identifier
pub const VERSION_COLUMN: &str = "version";

/// Column holding the name of the registry that applied the version
pub const NAME_COLUMN: &str = "name";

/// Longest identifier accepted, matching the Postgres identifier limit
const MAX_IDENTIFIER_LEN: usize = 63;

/// A validated SQL identifier naming the shared version table
///
/// Only ASCII letters, digits and underscores are accepted and the first
/// character must not be a digit. Case is significant; SQL builders go
/// through [`TableName::quoted`] so the stored name and the created table
/// agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn parse(name: impl Into<String>) -> MigrationResult<Self> {
        let name = name.into();
        let invalid = |reason: &str| MigrationError::InvalidIdentifier {
            identifier: name.clone(),
            reason: reason.to_string(),
        };

        let first = match name.chars().next() {
            Some(c) => c,
            None => return Err(invalid("identifier cannot be empty")),
        };
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid("identifier is longer than 63 characters"));
        }
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(invalid("identifier must start with a letter or underscore"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(
                "only ASCII letters, digits and underscores are allowed",
            ));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a quoted SQL identifier, case preserved
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Storage collaborator for the shared version table
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Check whether the version table exists in the target schema
    async fn table_exists(&self, table: &TableName) -> MigrationResult<bool>;

    /// Create the version table with `version` (primary key) and `name` columns
    async fn create_table(&self, table: &TableName) -> MigrationResult<()>;

    /// All versions recorded for `name`
    async fn migrated_versions(&self, table: &TableName, name: &str)
        -> MigrationResult<Vec<String>>;

    /// Whether `(version, name)` is recorded
    async fn is_migrated(&self, table: &TableName, name: &str, version: &str)
        -> MigrationResult<bool>;

    /// Greatest recorded version for `name` among `candidates`
    async fn latest_migrated(
        &self,
        table: &TableName,
        name: &str,
        candidates: &[String],
    ) -> MigrationResult<Option<String>>;

    /// Number of versions recorded for `name`
    async fn count_migrated(&self, table: &TableName, name: &str) -> MigrationResult<u64>;

    /// Record `(version, name)`; constraint violations are persistence errors
    async fn insert_version(&self, table: &TableName, name: &str, version: &str)
        -> MigrationResult<()>;

    /// Remove `(version, name)`, returning the number of deleted rows
    async fn delete_version(&self, table: &TableName, name: &str, version: &str)
        -> MigrationResult<u64>;
}
