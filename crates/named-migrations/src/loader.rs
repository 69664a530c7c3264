//! SQL file migrations
//!
//! Migrations live in a registry's directory as `Version<YYYYMMDDHHMMSS>.sql`
//! files with an up and a down section:
//!
//! ```sql
//! -- Up migration
//! CREATE TABLE posts (id SERIAL PRIMARY KEY);
//!
//! -- Down migration
//! DROP TABLE posts;
//! ```

use chrono::{DateTime, Utc};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::aggregate::RegistryAggregate;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::{Migration, Statements};
use crate::registry::NamedRegistry;
use crate::version::{validate_version_id, MigrationVersion};

/// File name prefix of migration files
pub const FILE_PREFIX: &str = "Version";

/// File extension of migration files
pub const FILE_EXTENSION: &str = "sql";

/// A migration read from a `.sql` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    description: String,
    up: Vec<String>,
    down: Vec<String>,
}

impl SqlMigration {
    pub fn new(description: impl Into<String>, up: Vec<String>, down: Vec<String>) -> Self {
        Self {
            description: description.into(),
            up,
            down,
        }
    }

    /// Parse file content into up and down statements
    pub fn parse(content: &str) -> Self {
        let mut description = String::new();
        let mut up_sql = Vec::new();
        let mut down_sql = Vec::new();
        let mut section = Section::Header;

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(marker) = section_marker(trimmed) {
                section = marker;
                continue;
            }

            if let Some(text) = trimmed.strip_prefix("-- Description:") {
                if description.is_empty() {
                    description = text.trim().to_string();
                }
                continue;
            }

            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }

            match section {
                Section::Up => up_sql.push(line),
                Section::Down => down_sql.push(line),
                Section::Header => {}
            }
        }

        Self {
            description,
            up: split_sql_statements(&up_sql.join("\n")),
            down: split_sql_statements(&down_sql.join("\n")),
        }
    }

    pub fn load(path: &Path) -> MigrationResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn up_statements(&self) -> &[String] {
        &self.up
    }

    pub fn down_statements(&self) -> &[String] {
        &self.down
    }
}

impl Migration for SqlMigration {
    fn description(&self) -> &str {
        &self.description
    }

    fn up(&self, statements: &mut Statements) -> MigrationResult<()> {
        statements.extend(self.up.iter().cloned());
        Ok(())
    }

    fn down(&self, statements: &mut Statements) -> MigrationResult<()> {
        statements.extend(self.down.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Up,
    Down,
}

/// Recognise `-- Up`, `-- Up migration` and the `down` equivalents
///
/// Only comment lines qualify; SQL mentioning these words is left alone.
fn section_marker(line: &str) -> Option<Section> {
    let comment = line.strip_prefix("--")?.trim().to_lowercase();
    let is_marker = |word: &str| comment == word || comment.starts_with(&format!("{} migration", word));

    if is_marker("up") {
        Some(Section::Up)
    } else if is_marker("down") {
        Some(Section::Down)
    } else {
        None
    }
}

/// Split SQL into single statements using the SQL parser
///
/// Falls back to splitting on `;` when the parser rejects the input, e.g.
/// for dialect specific syntax the generic dialect does not know.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(parsed) => parsed.into_iter().map(|stmt| stmt.to_string()).collect(),
        Err(e) => {
            tracing::warn!("SQL parsing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

/// Extract the version from a `Version<digits>.sql` file name
pub fn version_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
        return None;
    }
    let version = path
        .file_stem()
        .and_then(|s| s.to_str())?
        .strip_prefix(FILE_PREFIX)?;
    validate_version_id(version).ok()?;
    Some(version.to_string())
}

/// Register every migration file found in `directory`
///
/// A missing directory registers nothing.
pub fn register_from_directory(
    registry: &Arc<NamedRegistry>,
    directory: &Path,
) -> MigrationResult<Vec<MigrationVersion>> {
    if !directory.is_dir() {
        tracing::debug!(
            "No migrations directory at {} for '{}'",
            directory.display(),
            registry.name()
        );
        return Ok(Vec::new());
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if let Some(version) = version_from_path(&path) {
            files.push((version, path));
        }
    }
    files.sort();

    let mut registered = Vec::with_capacity(files.len());
    for (version, path) in files {
        let migration = SqlMigration::load(&path)?;
        registered.push(registry.register(version, Arc::new(migration))?);
    }

    tracing::debug!(
        "Registered {} migration(s) from {} for '{}'",
        registered.len(),
        directory.display(),
        registry.name()
    );
    Ok(registered)
}

/// Write an empty migration file into the main registry's directory
///
/// The directory is created when missing. Returns the path of the new file.
pub fn generate_migration(
    aggregate: &RegistryAggregate,
    at: DateTime<Utc>,
) -> MigrationResult<PathBuf> {
    let main = aggregate.main()?;
    let directory = main.migrations_directory().ok_or_else(|| {
        MigrationError::configuration(format!(
            "Migrations directory must be configured for '{}'",
            main.name()
        ))
    })?;

    if !directory.exists() {
        fs::create_dir_all(&directory)?;
        tracing::info!("Created migrations directory {}", directory.display());
    }

    let version = at.format("%Y%m%d%H%M%S").to_string();
    if aggregate.has_version(&version) {
        return Err(MigrationError::DuplicateVersion {
            registry: main.name().to_string(),
            version,
        });
    }

    let path = directory.join(format!("{}{}.{}", FILE_PREFIX, version, FILE_EXTENSION));
    if path.exists() {
        return Err(MigrationError::configuration(format!(
            "Migration file {} already exists",
            path.display()
        )));
    }

    fs::write(&path, migration_template(&main, &version, at))?;
    tracing::info!("Generated new migration file {}", path.display());
    Ok(path)
}

fn migration_template(registry: &NamedRegistry, version: &str, at: DateTime<Utc>) -> String {
    format!(
        "-- Migration: {}{}\n\
         -- Namespace: {}\n\
         -- Created: {}\n\
         -- Description:\n\n\
         -- Up migration\n\n\n\
         -- Down migration\n\n",
        FILE_PREFIX,
        version,
        registry.migrations_namespace().unwrap_or_default(),
        at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
