//! Executable migration units
//!
//! A [`Migration`] turns into a list of SQL statements for one direction.
//! Units that need outside services opt in through
//! [`Migration::dependency_aware`]; only those receive the registry's
//! [`DependencyResolver`] before they are planned.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::MigrationResult;
use crate::version::Direction;

/// SQL statements collected from a migration for one direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statements {
    sql: Vec<String>,
}

impl Statements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a statement
    pub fn add(&mut self, sql: impl Into<String>) -> &mut Self {
        let sql = sql.into();
        if !sql.trim().is_empty() {
            self.sql.push(sql);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.sql.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sql.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.sql
    }
}

impl<S: Into<String>> Extend<S> for Statements {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for sql in iter {
            self.add(sql);
        }
    }
}

/// A unit of schema change addressed by a migration version
pub trait Migration: Send + Sync {
    /// Human readable description shown in status output
    fn description(&self) -> &str {
        ""
    }

    /// Queue the statements that apply this migration
    fn up(&self, statements: &mut Statements) -> MigrationResult<()>;

    /// Queue the statements that revert this migration
    fn down(&self, statements: &mut Statements) -> MigrationResult<()>;

    /// Capability hook for migrations that need outside services
    fn dependency_aware(&self) -> Option<&dyn DependencyAware> {
        None
    }

    /// Collect the statements for `direction`
    fn plan(&self, direction: Direction) -> MigrationResult<Statements> {
        let mut statements = Statements::new();
        match direction {
            Direction::Up => self.up(&mut statements)?,
            Direction::Down => self.down(&mut statements)?,
        }
        Ok(statements)
    }
}

/// Looks up shared services by key
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>>;
}

impl dyn DependencyResolver {
    /// Resolve and downcast in one step
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.resolve(key)?.downcast::<T>().ok()
    }
}

/// Implemented by migrations that want a resolver injected before running
pub trait DependencyAware: Send + Sync {
    fn set_resolver(&self, resolver: Arc<dyn DependencyResolver>);
}

/// Holder a migration can embed to implement [`DependencyAware`]
#[derive(Default)]
pub struct ResolverSlot {
    resolver: RwLock<Option<Arc<dyn DependencyResolver>>>,
}

impl ResolverSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, resolver: Arc<dyn DependencyResolver>) {
        *self.resolver.write() = Some(resolver);
    }

    pub fn get(&self) -> Option<Arc<dyn DependencyResolver>> {
        self.resolver.read().clone()
    }
}

impl fmt::Debug for ResolverSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverSlot")
            .field("set", &self.resolver.read().is_some())
            .finish()
    }
}

/// Key/value service map usable as a [`DependencyResolver`]
#[derive(Default, Clone)]
pub struct ServiceMap {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, service: T) {
        self.services.insert(key.into(), Arc::new(service));
    }

    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, service: T) -> Self {
        self.insert(key, service);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }
}

impl DependencyResolver for ServiceMap {
    fn resolve(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.services.get(key).cloned()
    }
}

impl fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.services.keys().collect();
        keys.sort();
        f.debug_struct("ServiceMap").field("keys", &keys).finish()
    }
}
