//! Migration versions bound to the registry that owns them

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{MigrationError, MigrationResult};
use crate::migration::Migration;
use crate::registry::NamedRegistry;

/// Version reported when nothing has been migrated or registered
pub const NO_VERSION: &str = "0";

/// Number of digits in a `YYYYMMDDHHMMSS` version identifier
pub const VERSION_LENGTH: usize = 14;

/// Check that an identifier is a fixed-width `YYYYMMDDHHMMSS` timestamp
///
/// Fixed width is what makes plain string comparison equal numeric order.
pub fn validate_version_id(version: &str) -> MigrationResult<()> {
    if version.len() == VERSION_LENGTH && version.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(MigrationError::InvalidVersion {
            version: version.to_string(),
        })
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration
    Up,
    /// Revert the migration
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(MigrationError::invalid_value("direction", s, "up or down")),
        }
    }
}

/// One registered migration
///
/// Holds only a weak link to its registry; the registry owns the version,
/// never the other way round.
#[derive(Clone)]
pub struct MigrationVersion {
    id: String,
    migration: Arc<dyn Migration>,
    registry: Weak<NamedRegistry>,
    registry_name: String,
}

impl MigrationVersion {
    pub(crate) fn new(
        id: String,
        migration: Arc<dyn Migration>,
        registry: Weak<NamedRegistry>,
        registry_name: String,
    ) -> Self {
        Self {
            id,
            migration,
            registry,
            registry_name,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn migration(&self) -> &Arc<dyn Migration> {
        &self.migration
    }

    /// Name of the owning registry
    pub fn registry_name(&self) -> &str {
        &self.registry_name
    }

    /// Upgrade the back-reference to the owning registry
    pub fn registry(&self) -> MigrationResult<Arc<NamedRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| MigrationError::RegistryDropped {
                name: self.registry_name.clone(),
            })
    }

    /// Record this version as applied in its own registry scope
    pub async fn mark_applied(&self) -> MigrationResult<()> {
        self.registry()?.mark_applied(&self.id).await
    }

    /// Remove this version's record from its own registry scope
    pub async fn mark_unapplied(&self) -> MigrationResult<()> {
        self.registry()?.mark_unapplied(&self.id).await
    }

    /// Whether this version is recorded for its own registry
    pub async fn is_migrated(&self) -> MigrationResult<bool> {
        self.registry()?.has_version_migrated(&self.id).await
    }
}

impl fmt::Debug for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationVersion")
            .field("id", &self.id)
            .field("registry", &self.registry_name)
            .field("description", &self.migration.description())
            .finish()
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.registry_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_id_format() {
        assert!(validate_version_id("20230101000000").is_ok());
        assert!(validate_version_id("2023010100000").is_err());
        assert!(validate_version_id("2023-01-01 000").is_err());
        assert!(validate_version_id(NO_VERSION).is_err());
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("DOWN".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Down.to_string(), "down");
    }
}
