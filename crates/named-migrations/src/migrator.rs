//! Running migrations across every named registry
//!
//! The [`Migrator`] asks the aggregate which versions to run, hands each one
//! to the engine and records the result on the registry that owns it. A
//! failure stops the run; versions already handled stay recorded.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use crate::aggregate::RegistryAggregate;
use crate::engine::MigrationEngine;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::Statements;
use crate::version::{Direction, MigrationVersion, NO_VERSION};

/// Options for a migration run
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Plan statements without executing or recording anything
    pub dry_run: bool,
}

impl MigrateOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// A version handled during a run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedVersion {
    pub version: String,
    pub registry: String,
    pub statements: Vec<String>,
}

/// Result of running migrations
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunReport {
    pub direction: Direction,
    pub from: String,
    pub to: String,
    pub dry_run: bool,
    pub executed: Vec<ExecutedVersion>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunReport {
    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }

    pub fn executed_ids(&self) -> Vec<&str> {
        self.executed.iter().map(|e| e.version.as_str()).collect()
    }
}

/// Status line for one registered version
#[derive(Debug, Clone, Serialize)]
pub struct VersionStatus {
    pub version: String,
    pub registry: String,
    pub description: String,
    pub migrated: bool,
}

/// Overview of the whole migration set
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub namespace: Option<String>,
    pub directory: Option<PathBuf>,
    pub table_name: String,
    pub current_version: String,
    pub latest_version: String,
    pub executed_count: u64,
    pub available_count: usize,
    pub new_count: usize,
    /// Recorded versions no registry knows about, as `(registry, version)`
    pub executed_unavailable: Vec<(String, String)>,
    pub versions: Vec<VersionStatus>,
}

/// Runs migrations of an aggregate through an engine
pub struct Migrator<'a, E> {
    aggregate: &'a RegistryAggregate,
    engine: E,
}

impl<'a, E: MigrationEngine> Migrator<'a, E> {
    pub fn new(aggregate: &'a RegistryAggregate, engine: E) -> Self {
        Self { aggregate, engine }
    }

    pub fn aggregate(&self) -> &RegistryAggregate {
        self.aggregate
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Migrate every registry towards `target`
    ///
    /// Without a target the latest registered version is used; `"0"` reverts
    /// everything. The direction follows from comparing the aggregate's
    /// current version with the target.
    pub async fn migrate(
        &self,
        target: Option<&str>,
        options: MigrateOptions,
    ) -> MigrationResult<MigrationRunReport> {
        let start_time = Instant::now();
        self.aggregate.validate()?;

        let from = self.aggregate.current_version().await?;
        let to = match target {
            Some(version) => version.to_string(),
            None => self.aggregate.latest_version(),
        };
        if to != NO_VERSION && !self.aggregate.has_version(&to) {
            return Err(MigrationError::unknown_version(to));
        }

        let direction = if from > to { Direction::Down } else { Direction::Up };
        let pending = self.aggregate.pending_migrations(direction, &to).await?;

        if pending.is_empty() {
            tracing::info!("No migrations to execute (current version {})", from);
        } else {
            tracing::info!(
                "Migrating {} from {} to {} ({} version(s){})",
                direction,
                from,
                to,
                pending.len(),
                if options.dry_run { ", dry run" } else { "" }
            );
        }

        let mut executed = Vec::with_capacity(pending.len());
        for version in &pending {
            let statements = self.run_version(version, direction, options).await?;
            executed.push(ExecutedVersion {
                version: version.id().to_string(),
                registry: version.registry_name().to_string(),
                statements: statements.into_vec(),
            });
        }

        Ok(MigrationRunReport {
            direction,
            from,
            to,
            dry_run: options.dry_run,
            executed,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Run a single version in one direction
    pub async fn execute(
        &self,
        version: &str,
        direction: Direction,
        options: MigrateOptions,
    ) -> MigrationResult<ExecutedVersion> {
        self.aggregate.validate()?;
        let migration_version = self.aggregate.get_version(version)?;
        let migrated = migration_version.is_migrated().await?;

        match direction {
            Direction::Up if migrated => {
                return Err(MigrationError::AlreadyApplied {
                    version: version.to_string(),
                })
            }
            Direction::Down if !migrated => {
                return Err(MigrationError::NotApplied {
                    version: version.to_string(),
                })
            }
            _ => {}
        }

        let statements = self.run_version(&migration_version, direction, options).await?;
        Ok(ExecutedVersion {
            version: migration_version.id().to_string(),
            registry: migration_version.registry_name().to_string(),
            statements: statements.into_vec(),
        })
    }

    /// Add or delete a version record without running the migration
    pub async fn mark_version(&self, version: &str, add: bool) -> MigrationResult<()> {
        self.aggregate.validate()?;
        let migration_version = self.aggregate.get_version(version)?;
        let migrated = migration_version.is_migrated().await?;

        if add {
            if migrated {
                return Err(MigrationError::AlreadyApplied {
                    version: version.to_string(),
                });
            }
            migration_version.mark_applied().await
        } else {
            if !migrated {
                return Err(MigrationError::NotApplied {
                    version: version.to_string(),
                });
            }
            migration_version.mark_unapplied().await
        }
    }

    /// Collect the status of every registry
    pub async fn status(&self) -> MigrationResult<MigrationStatus> {
        self.aggregate.validate()?;
        let main = self.aggregate.main()?;

        let mut versions = Vec::new();
        let mut executed_unavailable = Vec::new();
        for registry in self.aggregate.registries() {
            let migrated: HashSet<String> =
                registry.migrated_versions().await?.into_iter().collect();

            for (id, version) in registry.versions() {
                versions.push(VersionStatus {
                    migrated: migrated.contains(&id),
                    registry: registry.name().to_string(),
                    description: version.migration().description().to_string(),
                    version: id,
                });
            }

            let mut unknown: Vec<_> = migrated
                .into_iter()
                .filter(|id| !registry.has_version(id))
                .collect();
            unknown.sort();
            executed_unavailable.extend(
                unknown
                    .into_iter()
                    .map(|id| (registry.name().to_string(), id)),
            );
        }
        versions.sort_by(|a, b| a.version.cmp(&b.version));

        let new_count = versions.iter().filter(|v| !v.migrated).count();
        Ok(MigrationStatus {
            name: main.name().to_string(),
            namespace: main.migrations_namespace(),
            directory: main.migrations_directory(),
            table_name: main
                .table_name()
                .map(|t| t.to_string())
                .unwrap_or_default(),
            current_version: self.aggregate.current_version().await?,
            latest_version: self.aggregate.latest_version(),
            executed_count: self.aggregate.count_executed().await?,
            available_count: self.aggregate.count_available(),
            new_count,
            executed_unavailable,
            versions,
        })
    }

    async fn run_version(
        &self,
        version: &MigrationVersion,
        direction: Direction,
        options: MigrateOptions,
    ) -> MigrationResult<Statements> {
        let migration = version.migration();
        if let Some(aware) = migration.dependency_aware() {
            if let Some(resolver) = version.registry()?.resolver() {
                aware.set_resolver(resolver);
            }
        }

        let statements = migration.plan(direction)?;
        if options.dry_run {
            tracing::info!(
                "[dry run] {} {} ({}): {} statement(s)",
                direction,
                version.id(),
                version.registry_name(),
                statements.len()
            );
            return Ok(statements);
        }

        let start_time = Instant::now();
        tracing::info!("{} {} ({})", direction, version.id(), version.registry_name());
        self.engine.execute(version, direction, &statements).await?;

        match direction {
            Direction::Up => version.mark_applied().await?,
            Direction::Down => version.mark_unapplied().await?,
        }
        tracing::debug!(
            "Finished {} {} in {}ms",
            direction,
            version.id(),
            start_time.elapsed().as_millis()
        );
        Ok(statements)
    }
}
