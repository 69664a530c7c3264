//! Aggregate of named registries
//!
//! Presents every module's [`NamedRegistry`] as one logical migration set.
//! Reads are unions across members. Directory, namespace and table name come
//! from the registry selected as main; writes always go to the registry that
//! owns a version.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MigrationError, MigrationResult};
use crate::registry::NamedRegistry;
use crate::store::TableName;
use crate::version::{Direction, MigrationVersion, NO_VERSION};

/// Several named registries acting as one migration configuration
#[derive(Debug, Default)]
pub struct RegistryAggregate {
    registries: Vec<Arc<NamedRegistry>>,
    main: Option<String>,
}

impl RegistryAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member registry, keyed by its own name
    pub fn add(&mut self, registry: Arc<NamedRegistry>) -> MigrationResult<()> {
        if self.contains(registry.name()) {
            return Err(MigrationError::DuplicateName {
                name: registry.name().to_string(),
            });
        }
        self.registries.push(registry);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registries.iter().any(|r| r.name() == name)
    }

    /// Members in insertion order
    pub fn registries(&self) -> &[Arc<NamedRegistry>] {
        &self.registries
    }

    pub fn get(&self, name: &str) -> MigrationResult<Arc<NamedRegistry>> {
        self.registries
            .iter()
            .find(|r| r.name() == name)
            .cloned()
            .ok_or_else(|| MigrationError::UnknownConfiguration {
                name: name.to_string(),
            })
    }

    /// Select the main registry; resolved lazily
    pub fn set_main(&mut self, name: impl Into<String>) {
        self.main = Some(name.into());
    }

    pub fn main_name(&self) -> Option<&str> {
        self.main.as_deref()
    }

    pub fn main(&self) -> MigrationResult<Arc<NamedRegistry>> {
        let name = self.main.as_deref().ok_or(MigrationError::NoMainConfiguration)?;
        self.get(name).map_err(|_| MigrationError::NoMainConfiguration)
    }

    /// Check that main resolves and every member is valid
    pub fn validate(&self) -> MigrationResult<()> {
        self.main()?;
        for registry in &self.registries {
            registry.validate()?;
        }
        Ok(())
    }

    pub fn migrations_directory(&self) -> MigrationResult<Option<PathBuf>> {
        Ok(self.main()?.migrations_directory())
    }

    pub fn set_migrations_directory(&self, directory: impl AsRef<Path>) -> MigrationResult<()> {
        self.main()?.set_migrations_directory(directory);
        Ok(())
    }

    pub fn migrations_namespace(&self) -> MigrationResult<Option<String>> {
        Ok(self.main()?.migrations_namespace())
    }

    pub fn set_migrations_namespace(&self, namespace: impl Into<String>) -> MigrationResult<()> {
        self.main()?.set_migrations_namespace(namespace);
        Ok(())
    }

    pub fn table_name(&self) -> MigrationResult<Option<TableName>> {
        Ok(self.main()?.table_name())
    }

    /// Point every member at the same version table
    pub fn set_table_name(&self, table_name: impl Into<String>) -> MigrationResult<()> {
        let table_name = TableName::parse(table_name)?;
        for registry in &self.registries {
            registry.set_table_name(table_name.as_str())?;
        }
        Ok(())
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.registries.iter().any(|r| r.has_version(version))
    }

    /// First member, in insertion order, that knows `version`
    pub fn get_version(&self, version: &str) -> MigrationResult<MigrationVersion> {
        self.registries
            .iter()
            .find(|r| r.has_version(version))
            .map(|r| r.get_version(version))
            .unwrap_or_else(|| Err(MigrationError::unknown_version(version)))
    }

    /// Whether the member owning `version` has recorded it
    pub async fn has_version_migrated(&self, version: &str) -> MigrationResult<bool> {
        for registry in &self.registries {
            if registry.has_version(version) && registry.has_version_migrated(version).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every member's versions merged in ascending order
    pub fn all_versions(&self) -> MigrationResult<BTreeMap<String, MigrationVersion>> {
        let mut merged: BTreeMap<String, MigrationVersion> = BTreeMap::new();
        for registry in &self.registries {
            for (id, version) in registry.versions() {
                insert_unique(&mut merged, id, version)?;
            }
        }
        Ok(merged)
    }

    /// Concatenation of every member's recorded versions
    pub async fn migrated_versions(&self) -> MigrationResult<Vec<String>> {
        let mut versions = Vec::new();
        for registry in &self.registries {
            versions.extend(registry.migrated_versions().await?);
        }
        Ok(versions)
    }

    /// Concatenation of every member's registered identifiers
    pub fn available_versions(&self) -> Vec<String> {
        self.registries
            .iter()
            .flat_map(|r| r.available_versions())
            .collect()
    }

    /// Highest current version across members
    pub async fn current_version(&self) -> MigrationResult<String> {
        let mut current = NO_VERSION.to_string();
        for registry in &self.registries {
            let version = registry.current_version().await?;
            if version > current {
                current = version;
            }
        }
        Ok(current)
    }

    pub async fn count_executed(&self) -> MigrationResult<u64> {
        let mut total = 0;
        for registry in &self.registries {
            total += registry.count_executed().await?;
        }
        Ok(total)
    }

    pub fn count_available(&self) -> usize {
        self.registries.iter().map(|r| r.count_available()).sum()
    }

    /// Highest registered version across members
    pub fn latest_version(&self) -> String {
        self.registries
            .iter()
            .map(|r| r.latest_version())
            .max()
            .unwrap_or_else(|| NO_VERSION.to_string())
    }

    /// Make sure the shared table exists; `true` if any member created it
    pub async fn ensure_table(&self) -> MigrationResult<bool> {
        let mut created = false;
        for registry in &self.registries {
            if registry.ensure_table().await? {
                created = true;
            }
        }
        Ok(created)
    }

    /// Union of each member's pending versions, in execution order
    ///
    /// Each member filters against its own recorded versions.
    pub async fn pending_migrations(
        &self,
        direction: Direction,
        target: &str,
    ) -> MigrationResult<Vec<MigrationVersion>> {
        let mut merged: BTreeMap<String, MigrationVersion> = BTreeMap::new();
        for registry in &self.registries {
            for version in registry.pending_migrations(direction, target).await? {
                insert_unique(&mut merged, version.id().to_string(), version)?;
            }
        }

        let pending = merged.into_values();
        Ok(match direction {
            Direction::Up => pending.collect(),
            Direction::Down => pending.rev().collect(),
        })
    }
}

fn insert_unique(
    merged: &mut BTreeMap<String, MigrationVersion>,
    id: String,
    version: MigrationVersion,
) -> MigrationResult<()> {
    if let Some(existing) = merged.get(&id) {
        return Err(MigrationError::ConflictingVersionIdentifier {
            version: id,
            first: existing.registry_name().to_string(),
            second: version.registry_name().to_string(),
        });
    }
    merged.insert(id, version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{Migration, Statements};
    use crate::store::MemoryVersionStore;

    struct Noop;

    impl Migration for Noop {
        fn up(&self, _statements: &mut Statements) -> MigrationResult<()> {
            Ok(())
        }

        fn down(&self, _statements: &mut Statements) -> MigrationResult<()> {
            Ok(())
        }
    }

    fn aggregate(store: Arc<MemoryVersionStore>) -> (RegistryAggregate, Arc<NamedRegistry>, Arc<NamedRegistry>) {
        let app = NamedRegistry::new("app", store.clone()).unwrap();
        let module = NamedRegistry::new("mod1", store).unwrap();
        app.set_migrations_directory("/srv/app/Migrations");
        app.set_migrations_namespace("Application\\Migrations");

        let mut aggregate = RegistryAggregate::new();
        aggregate.add(app.clone()).unwrap();
        aggregate.add(module.clone()).unwrap();
        aggregate.set_main("app");
        aggregate.set_table_name("migrations").unwrap();
        (aggregate, app, module)
    }

    #[test]
    fn test_validate_requires_main() {
        let store = Arc::new(MemoryVersionStore::new());
        let mut aggregate = RegistryAggregate::new();
        let app = NamedRegistry::new("app", store).unwrap();
        app.set_table_name("migrations").unwrap();
        aggregate.add(app).unwrap();

        assert!(matches!(aggregate.validate(), Err(MigrationError::NoMainConfiguration)));
        assert!(matches!(aggregate.table_name(), Err(MigrationError::NoMainConfiguration)));

        aggregate.set_main("missing");
        assert!(matches!(aggregate.validate(), Err(MigrationError::NoMainConfiguration)));

        aggregate.set_main("app");
        aggregate.validate().unwrap();
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let store = Arc::new(MemoryVersionStore::new());
        let mut aggregate = RegistryAggregate::new();
        aggregate.add(NamedRegistry::new("app", store.clone()).unwrap()).unwrap();

        let err = aggregate.add(NamedRegistry::new("app", store).unwrap()).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateName { .. }));
        assert!(matches!(
            aggregate.get("nope"),
            Err(MigrationError::UnknownConfiguration { .. })
        ));
    }

    #[test]
    fn test_settings_route_to_main_and_table_broadcasts() {
        let (aggregate, app, module) = aggregate(Arc::new(MemoryVersionStore::new()));

        assert_eq!(
            aggregate.migrations_directory().unwrap(),
            Some(PathBuf::from("/srv/app/Migrations"))
        );
        assert_eq!(
            aggregate.migrations_namespace().unwrap().as_deref(),
            Some("Application\\Migrations")
        );

        aggregate.set_migrations_namespace("App\\Db").unwrap();
        assert_eq!(app.migrations_namespace().as_deref(), Some("App\\Db"));
        assert_eq!(module.migrations_namespace(), None);

        aggregate.set_table_name("shared_versions").unwrap();
        assert_eq!(app.table_name().unwrap().as_str(), "shared_versions");
        assert_eq!(module.table_name().unwrap().as_str(), "shared_versions");
        assert!(aggregate.set_table_name("bad name").is_err());
    }

    #[test]
    fn test_version_lookup_and_merge() {
        let (aggregate, app, module) = aggregate(Arc::new(MemoryVersionStore::new()));
        module.register("20230101000000", Arc::new(Noop)).unwrap();
        app.register("20230601000000", Arc::new(Noop)).unwrap();

        assert!(aggregate.has_version("20230101000000"));
        assert_eq!(aggregate.get_version("20230101000000").unwrap().registry_name(), "mod1");
        assert!(matches!(
            aggregate.get_version("20990101000000"),
            Err(MigrationError::UnknownVersion { .. })
        ));

        let all = aggregate.all_versions().unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["20230101000000", "20230601000000"]);
        assert_eq!(aggregate.available_versions(), vec!["20230601000000", "20230101000000"]);
        assert_eq!(aggregate.latest_version(), "20230601000000");
        assert_eq!(aggregate.count_available(), 2);

        module.register("20230601000000", Arc::new(Noop)).unwrap();
        assert!(matches!(
            aggregate.all_versions(),
            Err(MigrationError::ConflictingVersionIdentifier { .. })
        ));
    }

    #[tokio::test]
    async fn test_counts_and_ensure_table() {
        let (aggregate, app, module) = aggregate(Arc::new(MemoryVersionStore::new()));
        module.register("20230101000000", Arc::new(Noop)).unwrap();
        app.register("20230601000000", Arc::new(Noop)).unwrap();

        assert!(aggregate.ensure_table().await.unwrap());
        assert!(!aggregate.ensure_table().await.unwrap());

        module.mark_applied("20230101000000").await.unwrap();
        app.mark_applied("20230601000000").await.unwrap();

        assert_eq!(aggregate.count_executed().await.unwrap(), 2);
        let migrated = aggregate.migrated_versions().await.unwrap();
        assert_eq!(migrated, vec!["20230601000000", "20230101000000"]);
        assert!(aggregate.has_version_migrated("20230101000000").await.unwrap());
        assert!(!aggregate.has_version_migrated("20990101000000").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_aggregate_defaults() {
        let aggregate = RegistryAggregate::new();
        assert_eq!(aggregate.current_version().await.unwrap(), NO_VERSION);
        assert_eq!(aggregate.latest_version(), NO_VERSION);
        assert!(!aggregate.ensure_table().await.unwrap());
    }
}
