//! Migration set configuration
//!
//! Describes the main application migrations and the modules contributing
//! their own sets. Values come from defaults, an optional YAML file and
//! `MIGRATIONS_*` environment variables, in that order.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

use crate::aggregate::RegistryAggregate;
use crate::error::{MigrationError, MigrationResult};
use crate::loader::register_from_directory;
use crate::registry::NamedRegistry;
use crate::store::{TableName, VersionStore};

pub const DEFAULT_APPLICATION_NAME: &str = "Application";
pub const DEFAULT_APPLICATION_NAMESPACE: &str = "Application\\Migrations";
pub const DEFAULT_BUNDLE_NAMESPACE: &str = "Migrations";
pub const DEFAULT_TABLE_NAME: &str = "migration_versions";

/// Directory under the project root holding application migrations
pub const DEFAULT_APPLICATION_DIRECTORY: &str = "Migrations";

/// A module that ships its own migrations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSource {
    /// Registry name, unique across the set
    pub name: String,
    /// Module root directory
    pub path: PathBuf,
    /// Module namespace, the bundle namespace is appended to it
    pub namespace: String,
}

impl ModuleSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            namespace: namespace.into(),
        }
    }
}

/// Configuration for the whole migration set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub application_name: String,
    /// Defaults to `<root>/Migrations`
    pub application_directory: Option<PathBuf>,
    pub application_namespace: String,
    pub bundle_namespace: String,
    pub table_name: String,
    pub modules: Vec<ModuleSource>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            application_directory: None,
            application_namespace: DEFAULT_APPLICATION_NAMESPACE.to_string(),
            bundle_namespace: DEFAULT_BUNDLE_NAMESPACE.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            modules: Vec::new(),
        }
    }
}

impl MigrationsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML file; missing keys keep their defaults
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> MigrationResult<Self> {
        let config = Self::default().with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MIGRATIONS_*` environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = env::var("MIGRATIONS_APPLICATION_NAME") {
            self.application_name = value;
        }
        if let Ok(value) = env::var("MIGRATIONS_APPLICATION_DIRECTORY") {
            self.application_directory = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("MIGRATIONS_APPLICATION_NAMESPACE") {
            self.application_namespace = value;
        }
        if let Ok(value) = env::var("MIGRATIONS_BUNDLE_NAMESPACE") {
            self.bundle_namespace = value;
        }
        if let Ok(value) = env::var("MIGRATIONS_TABLE_NAME") {
            self.table_name = value;
        }
        self
    }

    pub fn validate(&self) -> MigrationResult<()> {
        let required = [
            ("application_name", &self.application_name),
            ("application_namespace", &self.application_namespace),
            ("bundle_namespace", &self.bundle_namespace),
            ("table_name", &self.table_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MigrationError::invalid_value(field, value.as_str(), "a non-empty value"));
            }
        }

        if let Some(directory) = &self.application_directory {
            if directory.as_os_str().is_empty() {
                return Err(MigrationError::invalid_value(
                    "application_directory",
                    "",
                    "a non-empty path",
                ));
            }
        }

        TableName::parse(self.table_name.as_str())?;

        for module in &self.modules {
            if module.name.trim().is_empty() {
                return Err(MigrationError::invalid_value("modules.name", "", "a non-empty module name"));
            }
            if module.name == self.application_name {
                return Err(MigrationError::DuplicateName {
                    name: module.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Application migrations directory, resolved against `root`
    pub fn application_directory(&self, root: &Path) -> PathBuf {
        self.application_directory
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_APPLICATION_DIRECTORY))
    }

    /// Migrations namespace of a module
    pub fn module_namespace(&self, module: &ModuleSource) -> String {
        format!("{}\\{}", module.namespace, self.bundle_namespace)
    }

    /// Migrations directory of a module, following the bundle namespace
    pub fn module_directory(&self, module: &ModuleSource) -> PathBuf {
        let relative = self.bundle_namespace.replace('\\', &MAIN_SEPARATOR.to_string());
        module.path.join(relative)
    }

    /// Build the aggregate: one registry per module plus the application
    ///
    /// Migrations found in each directory are registered, every registry is
    /// pointed at the shared table and `main` (or the application) becomes
    /// the main registry.
    pub fn build_aggregate(
        &self,
        root: &Path,
        store: Arc<dyn VersionStore>,
        main: Option<&str>,
    ) -> MigrationResult<RegistryAggregate> {
        self.validate()?;
        let mut aggregate = RegistryAggregate::new();

        for module in &self.modules {
            let registry = NamedRegistry::new(module.name.as_str(), store.clone())?;
            registry.set_migrations_namespace(self.module_namespace(module));
            registry.set_migrations_directory(self.module_directory(module));
            registry.set_table_name(self.table_name.as_str())?;
            register_from_directory(&registry, &self.module_directory(module))?;
            aggregate.add(registry)?;
        }

        let application = NamedRegistry::new(self.application_name.as_str(), store)?;
        let directory = self.application_directory(root);
        application.set_migrations_namespace(self.application_namespace.as_str());
        application.set_migrations_directory(&directory);
        application.set_table_name(self.table_name.as_str())?;
        register_from_directory(&application, &directory)?;
        aggregate.add(application)?;

        aggregate.set_main(main.unwrap_or(&self.application_name));
        tracing::debug!(
            "Configured {} migration set(s), main is '{}'",
            aggregate.registries().len(),
            aggregate.main_name().unwrap_or_default()
        );
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVersionStore;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const MIGRATION: &str = "-- Up migration\nCREATE TABLE t (id INT);\n-- Down migration\nDROP TABLE t;\n";

    #[test]
    fn test_defaults() {
        let config = MigrationsConfig::default();
        assert_eq!(config.application_name, "Application");
        assert_eq!(config.application_namespace, "Application\\Migrations");
        assert_eq!(config.bundle_namespace, "Migrations");
        assert_eq!(config.table_name, "migration_versions");
        assert_eq!(
            config.application_directory(Path::new("/srv/app")),
            PathBuf::from("/srv/app/Migrations")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_load_yaml_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("migrations.yaml");
        fs::write(
            &path,
            "table_name: schema_versions\nmodules:\n  - name: Blog\n    path: /srv/blog\n    namespace: Acme\\Blog\n",
        )
        .unwrap();

        let config = MigrationsConfig::load(&path).unwrap();
        assert_eq!(config.table_name, "schema_versions");
        assert_eq!(config.application_name, "Application");
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.module_namespace(&config.modules[0]), "Acme\\Blog\\Migrations");
        assert_eq!(
            config.module_directory(&config.modules[0]),
            PathBuf::from("/srv/blog").join("Migrations")
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut config = MigrationsConfig::default();
        config.table_name = String::new();
        assert!(matches!(config.validate(), Err(MigrationError::InvalidValue { .. })));

        config.table_name = "bad-name".to_string();
        assert!(matches!(config.validate(), Err(MigrationError::InvalidIdentifier { .. })));

        let mut config = MigrationsConfig::default();
        config.modules.push(ModuleSource::new("Application", "/x", "X"));
        assert!(matches!(config.validate(), Err(MigrationError::DuplicateName { .. })));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("MIGRATIONS_TABLE_NAME", "env_versions");
        env::set_var("MIGRATIONS_APPLICATION_NAME", "Main");
        let config = MigrationsConfig::from_env().unwrap();
        env::remove_var("MIGRATIONS_TABLE_NAME");
        env::remove_var("MIGRATIONS_APPLICATION_NAME");

        assert_eq!(config.table_name, "env_versions");
        assert_eq!(config.application_name, "Main");
        assert_eq!(config.bundle_namespace, "Migrations");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_rejected() {
        env::set_var("MIGRATIONS_BUNDLE_NAMESPACE", "  ");
        let result = MigrationsConfig::from_env();
        env::remove_var("MIGRATIONS_BUNDLE_NAMESPACE");

        assert!(matches!(result, Err(MigrationError::InvalidValue { .. })));
    }

    #[test]
    fn test_build_aggregate_registers_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let blog = root.join("blog");
        fs::create_dir_all(blog.join("Migrations")).unwrap();
        fs::create_dir_all(root.join("Migrations")).unwrap();
        fs::write(blog.join("Migrations").join("Version20230101000000.sql"), MIGRATION).unwrap();
        fs::write(root.join("Migrations").join("Version20230601000000.sql"), MIGRATION).unwrap();

        let mut config = MigrationsConfig::default();
        config.modules.push(ModuleSource::new("Blog", &blog, "Acme\\Blog"));

        let store = Arc::new(MemoryVersionStore::new());
        let aggregate = config.build_aggregate(root, store.clone(), None).unwrap();

        assert_eq!(aggregate.registries().len(), 2);
        assert_eq!(aggregate.main_name(), Some("Application"));
        assert_eq!(
            aggregate.migrations_directory().unwrap(),
            Some(root.join("Migrations"))
        );
        assert_eq!(
            aggregate.get("Blog").unwrap().migrations_namespace().as_deref(),
            Some("Acme\\Blog\\Migrations")
        );
        assert_eq!(aggregate.get_version("20230101000000").unwrap().registry_name(), "Blog");
        assert_eq!(aggregate.table_name().unwrap().unwrap().as_str(), "migration_versions");

        let aggregate = config.build_aggregate(root, store, Some("Blog")).unwrap();
        assert_eq!(aggregate.main().unwrap().name(), "Blog");
    }
}
