//! Named migration registry
//!
//! A [`NamedRegistry`] tracks the migrations of one module (or of the main
//! application) inside a version table shared with every other module. Rows
//! are told apart by the `name` column, so each registry only ever reads and
//! writes its own rows.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MigrationError, MigrationResult};
use crate::migration::{DependencyResolver, Migration};
use crate::store::{TableName, VersionStore};
use crate::version::{validate_version_id, Direction, MigrationVersion, NO_VERSION};

/// Settings that may change after the registry is shared
#[derive(Default)]
struct RegistrySettings {
    migrations_directory: Option<PathBuf>,
    migrations_namespace: Option<String>,
    table_name: Option<TableName>,
    resolver: Option<Arc<dyn DependencyResolver>>,
}

/// Migration state scoped to a single name
pub struct NamedRegistry {
    name: String,
    store: Arc<dyn VersionStore>,
    settings: RwLock<RegistrySettings>,
    versions: RwLock<BTreeMap<String, MigrationVersion>>,
    table_checked: AtomicBool,
}

impl NamedRegistry {
    /// Create a registry for `name` on top of the shared store
    pub fn new(name: impl Into<String>, store: Arc<dyn VersionStore>) -> MigrationResult<Arc<Self>> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MigrationError::invalid_value(
                "name",
                name,
                "a non-empty configuration name",
            ));
        }

        Ok(Arc::new(Self {
            name,
            store,
            settings: RwLock::new(RegistrySettings::default()),
            versions: RwLock::new(BTreeMap::new()),
            table_checked: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    pub fn migrations_directory(&self) -> Option<PathBuf> {
        self.settings.read().migrations_directory.clone()
    }

    pub fn set_migrations_directory(&self, directory: impl AsRef<Path>) {
        self.settings.write().migrations_directory = Some(directory.as_ref().to_path_buf());
    }

    pub fn migrations_namespace(&self) -> Option<String> {
        self.settings.read().migrations_namespace.clone()
    }

    pub fn set_migrations_namespace(&self, namespace: impl Into<String>) {
        self.settings.write().migrations_namespace = Some(namespace.into());
    }

    pub fn table_name(&self) -> Option<TableName> {
        self.settings.read().table_name.clone()
    }

    /// Point this registry at a (validated) version table
    ///
    /// Switching tables forgets the cached table check.
    pub fn set_table_name(&self, table_name: impl Into<String>) -> MigrationResult<()> {
        let table_name = TableName::parse(table_name)?;
        let mut settings = self.settings.write();
        if settings.table_name.as_ref() != Some(&table_name) {
            settings.table_name = Some(table_name);
            self.table_checked.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn resolver(&self) -> Option<Arc<dyn DependencyResolver>> {
        self.settings.read().resolver.clone()
    }

    /// Resolver handed to migrations that declare they need one
    pub fn set_resolver(&self, resolver: Arc<dyn DependencyResolver>) {
        self.settings.write().resolver = Some(resolver);
    }

    /// Check required settings
    pub fn validate(&self) -> MigrationResult<()> {
        if self.table_name().is_none() {
            return Err(MigrationError::configuration(format!(
                "Migrations table name must be configured for '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn require_table(&self) -> MigrationResult<TableName> {
        self.validate()?;
        self.table_name().ok_or_else(|| {
            MigrationError::configuration(format!("No migrations table configured for '{}'", self.name))
        })
    }

    /// Register a migration under `version`
    pub fn register(
        self: &Arc<Self>,
        version: impl Into<String>,
        migration: Arc<dyn Migration>,
    ) -> MigrationResult<MigrationVersion> {
        let version = version.into();
        validate_version_id(&version)?;

        let mut versions = self.versions.write();
        if versions.contains_key(&version) {
            return Err(MigrationError::DuplicateVersion {
                registry: self.name.clone(),
                version,
            });
        }

        let entry = MigrationVersion::new(
            version.clone(),
            migration,
            Arc::downgrade(self),
            self.name.clone(),
        );
        versions.insert(version, entry.clone());
        tracing::debug!("Registered migration {} with '{}'", entry.id(), self.name);
        Ok(entry)
    }

    /// Register several migrations, stopping at the first failure
    pub fn register_all<I, V>(self: &Arc<Self>, migrations: I) -> MigrationResult<Vec<MigrationVersion>>
    where
        I: IntoIterator<Item = (V, Arc<dyn Migration>)>,
        V: Into<String>,
    {
        migrations
            .into_iter()
            .map(|(version, migration)| self.register(version, migration))
            .collect()
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.versions.read().contains_key(version)
    }

    pub fn get_version(&self, version: &str) -> MigrationResult<MigrationVersion> {
        self.versions
            .read()
            .get(version)
            .cloned()
            .ok_or_else(|| MigrationError::unknown_version(version))
    }

    /// Registered versions in ascending order
    pub fn versions(&self) -> BTreeMap<String, MigrationVersion> {
        self.versions.read().clone()
    }

    /// Registered identifiers in ascending order
    pub fn available_versions(&self) -> Vec<String> {
        self.versions.read().keys().cloned().collect()
    }

    /// Make sure the shared version table exists
    ///
    /// Returns `true` only when this call created the table. After the first
    /// successful check every call is a no-op returning `false`.
    pub async fn ensure_table(&self) -> MigrationResult<bool> {
        let table = self.require_table()?;
        if self.table_checked.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let created = if self.store.table_exists(&table).await? {
            tracing::debug!("Migrations table {} already exists", table);
            false
        } else {
            self.store.create_table(&table).await?;
            tracing::info!("Created migrations table {} for '{}'", table, self.name);
            true
        };

        self.table_checked.store(true, Ordering::SeqCst);
        Ok(created)
    }

    /// Versions recorded for this name
    pub async fn migrated_versions(&self) -> MigrationResult<Vec<String>> {
        self.ensure_table().await?;
        let table = self.require_table()?;
        self.store.migrated_versions(&table, &self.name).await
    }

    pub async fn has_version_migrated(&self, version: &str) -> MigrationResult<bool> {
        self.ensure_table().await?;
        let table = self.require_table()?;
        self.store.is_migrated(&table, &self.name, version).await
    }

    /// Greatest version both registered here and recorded for this name
    pub async fn current_version(&self) -> MigrationResult<String> {
        self.ensure_table().await?;
        let table = self.require_table()?;

        let candidates = self.available_versions();
        if candidates.is_empty() {
            return Ok(NO_VERSION.to_string());
        }

        let latest = self
            .store
            .latest_migrated(&table, &self.name, &candidates)
            .await?;
        Ok(latest.unwrap_or_else(|| NO_VERSION.to_string()))
    }

    pub async fn count_executed(&self) -> MigrationResult<u64> {
        self.ensure_table().await?;
        let table = self.require_table()?;
        self.store.count_migrated(&table, &self.name).await
    }

    pub fn count_available(&self) -> usize {
        self.versions.read().len()
    }

    /// Greatest registered version, or `"0"`
    pub fn latest_version(&self) -> String {
        self.versions
            .read()
            .keys()
            .next_back()
            .cloned()
            .unwrap_or_else(|| NO_VERSION.to_string())
    }

    /// Versions to run for `direction` towards `target`, in execution order
    ///
    /// Up: unmigrated versions at or below `target`, ascending.
    /// Down: migrated versions above `target`, descending.
    pub async fn pending_migrations(
        &self,
        direction: Direction,
        target: &str,
    ) -> MigrationResult<Vec<MigrationVersion>> {
        let migrated: HashSet<String> = self.migrated_versions().await?.into_iter().collect();
        let candidates: Vec<MigrationVersion> = {
            let versions = self.versions.read();
            match direction {
                Direction::Up => versions.values().cloned().collect(),
                Direction::Down => versions.values().rev().cloned().collect(),
            }
        };

        Ok(candidates
            .into_iter()
            .filter(|version| should_execute(direction, version.id(), target, &migrated))
            .collect())
    }

    /// Record `version` as applied for this name
    pub async fn mark_applied(&self, version: &str) -> MigrationResult<()> {
        self.ensure_table().await?;
        let table = self.require_table()?;
        self.store.insert_version(&table, &self.name, version).await?;
        tracing::debug!("Marked {} as migrated for '{}'", version, self.name);
        Ok(())
    }

    /// Remove the record of `version` for this name, if any
    pub async fn mark_unapplied(&self, version: &str) -> MigrationResult<()> {
        self.ensure_table().await?;
        let table = self.require_table()?;
        let removed = self.store.delete_version(&table, &self.name, version).await?;
        tracing::debug!(
            "Marked {} as not migrated for '{}' ({} row(s))",
            version,
            self.name,
            removed
        );
        Ok(())
    }
}

fn should_execute(direction: Direction, version: &str, target: &str, migrated: &HashSet<String>) -> bool {
    match direction {
        Direction::Up => !migrated.contains(version) && version <= target,
        Direction::Down => migrated.contains(version) && version > target,
    }
}

impl fmt::Debug for NamedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = self.settings.read();
        f.debug_struct("NamedRegistry")
            .field("name", &self.name)
            .field("migrations_directory", &settings.migrations_directory)
            .field("migrations_namespace", &settings.migrations_namespace)
            .field("table_name", &settings.table_name)
            .field("versions", &self.versions.read().len())
            .finish()
    }
}
