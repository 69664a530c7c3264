//! Error types for named migration sets
//!
//! Every failure is surfaced to the caller as-is. A migration run is a
//! one-shot administrative task, so nothing here is retried or recovered.

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors raised by registries, stores, engines and configuration loading
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration version {version} already registered with '{registry}'")]
    DuplicateVersion { registry: String, version: String },

    #[error("Could not find migration version {version}")]
    UnknownVersion { version: String },

    #[error("No configuration found named {name}")]
    UnknownConfiguration { name: String },

    #[error("No main configuration defined in collection configuration")]
    NoMainConfiguration,

    #[error("A configuration named {name} is already part of the collection")]
    DuplicateName { name: String },

    #[error("Version {version} is registered by both '{first}' and '{second}'")]
    ConflictingVersionIdentifier {
        version: String,
        first: String,
        second: String,
    },

    #[error("Invalid migration version '{version}': expected 14 digits (YYYYMMDDHHMMSS)")]
    InvalidVersion { version: String },

    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Registry '{name}' owning this version is no longer available")]
    RegistryDropped { name: String },

    #[error("The version {version} already exists in the version table")]
    AlreadyApplied { version: String },

    #[error("The version {version} does not exist in the version table")]
    NotApplied { version: String },

    #[error("Migration {version} failed: {message}")]
    Execution { version: String, message: String },

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MigrationError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a persistence error without an underlying source
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// Create a persistence error wrapping the storage failure
    pub fn persistence_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an execution error for a single migration version
    pub fn execution(version: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            version: version.into(),
            message: message.into(),
        }
    }

    pub fn unknown_version(version: impl Into<String>) -> Self {
        Self::UnknownVersion {
            version: version.into(),
        }
    }

    /// Whether the error came from the storage collaborator
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        MigrationError::persistence_with_source(message, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MigrationError::DuplicateVersion {
            registry: "app".to_string(),
            version: "20230101000000".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration version 20230101000000 already registered with 'app'"
        );

        assert_eq!(
            MigrationError::NoMainConfiguration.to_string(),
            "No main configuration defined in collection configuration"
        );

        let err = MigrationError::invalid_value("table_name", "", "a non-empty value");
        assert!(err.to_string().contains("table_name"));
    }

    #[test]
    fn test_persistence_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = MigrationError::persistence_with_source("insert failed", io);

        assert!(err.is_persistence());
        assert!(std::error::Error::source(&err).is_some());
        assert!(!MigrationError::persistence("x").to_string().is_empty());
    }
}
