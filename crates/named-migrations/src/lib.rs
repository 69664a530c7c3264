//! # named-migrations
//!
//! Several independent migration sets, one per module plus the main
//! application, tracked side by side in a single shared version table.
//!
//! ## Features
//!
//! - **Named registries**: each set records its applied versions under its own name
//! - **Aggregate view**: one facade answering version queries across every set
//! - **Scoped persistence**: marking a version always writes to the owning registry
//! - **Pluggable storage**: Postgres through sqlx, or in memory for tests
//! - **SQL file migrations**: `Version<YYYYMMDDHHMMSS>.sql` with up and down sections
//!
//! ## Quick Start
//!
//! ```rust
//! use named_migrations::{MemoryVersionStore, NamedRegistry, RegistryAggregate, SqlMigration};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryVersionStore::new());
//!
//! let app = NamedRegistry::new("app", store.clone()).unwrap();
//! app.register(
//!     "20230601000000",
//!     Arc::new(SqlMigration::parse("-- Up migration\nCREATE TABLE posts (id INT);")),
//! )
//! .unwrap();
//!
//! let blog = NamedRegistry::new("blog", store).unwrap();
//! blog.register(
//!     "20230101000000",
//!     Arc::new(SqlMigration::parse("-- Up migration\nCREATE TABLE comments (id INT);")),
//! )
//! .unwrap();
//!
//! let mut aggregate = RegistryAggregate::new();
//! aggregate.add(app).unwrap();
//! aggregate.add(blog).unwrap();
//! aggregate.set_main("app");
//! aggregate.set_table_name("migrations").unwrap();
//!
//! assert_eq!(aggregate.latest_version(), "20230601000000");
//! assert_eq!(aggregate.get_version("20230101000000").unwrap().registry_name(), "blog");
//! ```

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod migration;
pub mod migrator;
pub mod registry;
pub mod store;
pub mod version;

pub use aggregate::RegistryAggregate;
pub use config::{MigrationsConfig, ModuleSource};
pub use engine::{MigrationEngine, PgEngine};
pub use error::{MigrationError, MigrationResult};
pub use loader::{generate_migration, register_from_directory, split_sql_statements, SqlMigration};
pub use migration::{
    DependencyAware, DependencyResolver, Migration, ResolverSlot, ServiceMap, Statements,
};
pub use migrator::{
    ExecutedVersion, MigrateOptions, MigrationRunReport, MigrationStatus, Migrator, VersionStatus,
};
pub use registry::NamedRegistry;
pub use store::{MemoryVersionStore, PgVersionStore, TableName, VersionStore};
pub use version::{validate_version_id, Direction, MigrationVersion, NO_VERSION};
