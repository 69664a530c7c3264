use async_trait::async_trait;
use named_migrations::{
    Direction, MemoryVersionStore, MigrateOptions, Migration, MigrationEngine, MigrationError,
    MigrationResult, MigrationVersion, Migrator, NamedRegistry, RegistryAggregate, Statements,
    TableName,
};
use parking_lot::Mutex;
use std::sync::Arc;

struct CreateTable(&'static str);

impl Migration for CreateTable {
    fn description(&self) -> &str {
        self.0
    }

    fn up(&self, statements: &mut Statements) -> MigrationResult<()> {
        statements.add(format!("CREATE TABLE {} (id INT)", self.0));
        Ok(())
    }

    fn down(&self, statements: &mut Statements) -> MigrationResult<()> {
        statements.add(format!("DROP TABLE {}", self.0));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingEngine {
    runs: Mutex<Vec<(String, Direction)>>,
}

impl RecordingEngine {
    fn runs(&self) -> Vec<(String, Direction)> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl MigrationEngine for RecordingEngine {
    async fn execute(
        &self,
        version: &MigrationVersion,
        direction: Direction,
        _statements: &Statements,
    ) -> MigrationResult<()> {
        self.runs.lock().push((version.id().to_string(), direction));
        Ok(())
    }
}

struct Setup {
    store: Arc<MemoryVersionStore>,
    app: Arc<NamedRegistry>,
    module: Arc<NamedRegistry>,
    aggregate: RegistryAggregate,
}

/// "app" owns 20230601000000 and is main, "mod1" owns 20230101000000
fn setup() -> Setup {
    let store = Arc::new(MemoryVersionStore::new());

    let app = NamedRegistry::new("app", store.clone()).unwrap();
    app.register("20230601000000", Arc::new(CreateTable("posts")))
        .unwrap();

    let module = NamedRegistry::new("mod1", store.clone()).unwrap();
    module
        .register("20230101000000", Arc::new(CreateTable("comments")))
        .unwrap();

    let mut aggregate = RegistryAggregate::new();
    aggregate.add(app.clone()).unwrap();
    aggregate.add(module.clone()).unwrap();
    aggregate.set_main("app");
    aggregate.set_table_name("migrations").unwrap();

    Setup {
        store,
        app,
        module,
        aggregate,
    }
}

fn table() -> TableName {
    TableName::parse("migrations").unwrap()
}

#[tokio::test]
async fn test_current_version_follows_marks_across_registries() {
    let setup = setup();
    let aggregate = &setup.aggregate;

    assert_eq!(aggregate.current_version().await.unwrap(), "0");

    aggregate
        .get_version("20230101000000")
        .unwrap()
        .mark_applied()
        .await
        .unwrap();
    assert_eq!(aggregate.current_version().await.unwrap(), "20230101000000");
    assert_eq!(setup.module.current_version().await.unwrap(), "20230101000000");
    assert_eq!(setup.app.current_version().await.unwrap(), "0");

    aggregate
        .get_version("20230601000000")
        .unwrap()
        .mark_applied()
        .await
        .unwrap();
    assert_eq!(aggregate.current_version().await.unwrap(), "20230601000000");
    assert_eq!(aggregate.count_executed().await.unwrap(), 2);
}

#[tokio::test]
async fn test_marks_are_scoped_to_owning_registry() {
    let setup = setup();
    setup
        .aggregate
        .get_version("20230101000000")
        .unwrap()
        .mark_applied()
        .await
        .unwrap();

    let rows = setup.store.rows(&table());
    assert_eq!(
        rows,
        vec![("20230101000000".to_string(), "mod1".to_string())]
    );
    assert!(setup.aggregate.has_version_migrated("20230101000000").await.unwrap());
    assert!(!setup.app.has_version_migrated("20230101000000").await.unwrap());
}

#[tokio::test]
async fn test_mark_round_trip_restores_state() {
    let setup = setup();
    let version = setup.aggregate.get_version("20230601000000").unwrap();

    version.mark_applied().await.unwrap();
    assert!(version.is_migrated().await.unwrap());

    version.mark_unapplied().await.unwrap();
    assert!(!version.is_migrated().await.unwrap());
    assert_eq!(setup.aggregate.current_version().await.unwrap(), "0");
    assert!(setup.store.rows(&table()).is_empty());
}

#[tokio::test]
async fn test_validate_without_main() {
    let store = Arc::new(MemoryVersionStore::new());
    let mut aggregate = RegistryAggregate::new();
    aggregate
        .add(NamedRegistry::new("app", store).unwrap())
        .unwrap();

    assert!(matches!(
        aggregate.validate(),
        Err(MigrationError::NoMainConfiguration)
    ));
}

#[tokio::test]
async fn test_pending_up_is_ascending_across_registries() {
    let setup = setup();

    let pending = setup
        .aggregate
        .pending_migrations(Direction::Up, "20230601000000")
        .await
        .unwrap();
    let ids: Vec<_> = pending.iter().map(|v| v.id()).collect();
    assert_eq!(ids, vec!["20230101000000", "20230601000000"]);

    let owners: Vec<_> = pending.iter().map(|v| v.registry_name()).collect();
    assert_eq!(owners, vec!["mod1", "app"]);

    let partial = setup
        .aggregate
        .pending_migrations(Direction::Up, "20230101000000")
        .await
        .unwrap();
    assert_eq!(partial.len(), 1);
}

#[tokio::test]
async fn test_migrate_up_then_back_to_zero() {
    let setup = setup();
    let engine = RecordingEngine::default();
    let migrator = Migrator::new(&setup.aggregate, engine);

    let report = migrator
        .migrate(None, MigrateOptions::default())
        .await
        .unwrap();
    assert_eq!(report.direction, Direction::Up);
    assert_eq!(report.from, "0");
    assert_eq!(report.to, "20230601000000");
    assert_eq!(report.executed_ids(), vec!["20230101000000", "20230601000000"]);

    let again = migrator
        .migrate(None, MigrateOptions::default())
        .await
        .unwrap();
    assert_eq!(again.executed_count(), 0);

    let report = migrator
        .migrate(Some("0"), MigrateOptions::default())
        .await
        .unwrap();
    assert_eq!(report.direction, Direction::Down);
    assert_eq!(report.executed_ids(), vec!["20230601000000", "20230101000000"]);
    assert_eq!(setup.aggregate.current_version().await.unwrap(), "0");

    let runs = migrator.engine().runs();
    assert_eq!(runs.len(), 4);
    assert_eq!(runs[2], ("20230601000000".to_string(), Direction::Down));
}

#[tokio::test]
async fn test_dry_run_records_nothing() {
    let setup = setup();
    let migrator = Migrator::new(&setup.aggregate, RecordingEngine::default());

    let report = migrator
        .migrate(None, MigrateOptions::dry_run())
        .await
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.executed_count(), 2);
    assert!(migrator.engine().runs().is_empty());
    assert_eq!(setup.aggregate.current_version().await.unwrap(), "0");
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let setup = setup();
    let migrator = Migrator::new(&setup.aggregate, RecordingEngine::default());

    assert!(matches!(
        migrator
            .migrate(Some("20991231235959"), MigrateOptions::default())
            .await,
        Err(MigrationError::UnknownVersion { .. })
    ));
}
