//! Migration execution engines
//!
//! An engine runs the statements a migration produced for one direction. It
//! never touches the version table; recording the outcome is up to the
//! caller, against the registry that owns the version.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{MigrationError, MigrationResult};
use crate::migration::Statements;
use crate::version::{Direction, MigrationVersion};

/// Executes migration statements against the target database
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    async fn execute(
        &self,
        version: &MigrationVersion,
        direction: Direction,
        statements: &Statements,
    ) -> MigrationResult<()>;
}

/// Engine running each migration inside one Postgres transaction
#[derive(Debug, Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MigrationEngine for PgEngine {
    async fn execute(
        &self,
        version: &MigrationVersion,
        direction: Direction,
        statements: &Statements,
    ) -> MigrationResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|e| {
            MigrationError::persistence_with_source("Failed to start transaction", e)
        })?;

        for statement in statements.iter() {
            tracing::debug!("{} {}: {}", direction, version.id(), statement);
            sqlx::query(statement)
                .execute(&mut *transaction)
                .await
                .map_err(|e| {
                    MigrationError::execution(
                        version.id(),
                        format!("{} failed on `{}`: {}", direction, statement, e),
                    )
                })?;
        }

        transaction.commit().await.map_err(|e| {
            MigrationError::persistence_with_source(
                format!("Failed to commit migration {}", version.id()),
                e,
            )
        })?;
        Ok(())
    }
}
