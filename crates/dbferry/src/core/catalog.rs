//! Plugin registry for explicit dependency injection.
//!
//! The [`PluginRegistry`] maps case-insensitive names to connectors for each
//! capability. It is built once at startup and handed to the orchestrator;
//! there is no global registration.
//!
//! Readers, writers and assistants are registered as async connectors: every
//! call opens a fresh connection, so each worker owns its own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{FerryError, Result};

use super::schema::Database;
use super::traits::{Assistant, Reader, RowFilter, Writer};

type AssistantConnector =
    Arc<dyn Fn(Database) -> BoxFuture<'static, Result<Box<dyn Assistant>>> + Send + Sync>;
type ReaderConnector =
    Arc<dyn Fn(Database) -> BoxFuture<'static, Result<Box<dyn Reader>>> + Send + Sync>;
type WriterConnector =
    Arc<dyn Fn(Database) -> BoxFuture<'static, Result<Box<dyn Writer>>> + Send + Sync>;

/// Registry of dialect plugins and row filters.
///
/// # Example
///
/// ```rust,ignore
/// let store = MemoryStore::new();
/// let mut registry = PluginRegistry::with_builtins();
/// registry.register_memory("memory", store.clone());
///
/// let reader = registry.open_reader(&Database::new("memory")).await?;
/// ```
#[derive(Default, Clone)]
pub struct PluginRegistry {
    assistants: HashMap<String, AssistantConnector>,
    readers: HashMap<String, ReaderConnector>,
    writers: HashMap<String, WriterConnector>,
    filters: HashMap<String, Arc<dyn RowFilter>>,
}

fn key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in dialects and filters.
    ///
    /// Dialects are compiled in by Cargo feature (`postgres`, `mssql`).
    /// The memory dialect needs a caller-owned store, see
    /// [`register_memory`](Self::register_memory).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "postgres")]
        for name in ["postgres", "postgresql", "pg"] {
            crate::drivers::postgres::register(&mut registry, name);
        }

        #[cfg(feature = "mssql")]
        for name in ["mssql", "sqlserver"] {
            crate::drivers::mssql::register(&mut registry, name);
        }

        registry.register_filter(crate::drivers::filters::TrimFilter);
        registry.register_filter(crate::drivers::filters::MaskFilter);

        registry
    }

    /// Register an assistant connector.
    pub fn register_assistant<F, Fut>(&mut self, name: &str, connect: F)
    where
        F: Fn(Database) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Assistant>>> + Send + 'static,
    {
        self.assistants
            .insert(key(name), Arc::new(move |db: Database| connect(db).boxed()));
    }

    /// Register a reader connector.
    pub fn register_reader<F, Fut>(&mut self, name: &str, connect: F)
    where
        F: Fn(Database) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Reader>>> + Send + 'static,
    {
        self.readers
            .insert(key(name), Arc::new(move |db: Database| connect(db).boxed()));
    }

    /// Register a writer connector.
    pub fn register_writer<F, Fut>(&mut self, name: &str, connect: F)
    where
        F: Fn(Database) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Writer>>> + Send + 'static,
    {
        self.writers
            .insert(key(name), Arc::new(move |db: Database| connect(db).boxed()));
    }

    /// Register a row filter under its own name.
    pub fn register_filter(&mut self, filter: impl RowFilter + 'static) {
        self.filters.insert(key(filter.name()), Arc::new(filter));
    }

    /// Register all three capabilities of the memory dialect, backed by
    /// `store`.
    pub fn register_memory(&mut self, name: &str, store: crate::drivers::memory::MemoryStore) {
        crate::drivers::memory::register(self, name, store);
    }

    /// Open an assistant for `db`.
    pub async fn open_assistant(&self, db: &Database) -> Result<Box<dyn Assistant>> {
        let connect = lookup(&self.assistants, "assistant", &db.dialect)?;
        connect(db.clone()).await
    }

    /// Open a reader for `db`.
    pub async fn open_reader(&self, db: &Database) -> Result<Box<dyn Reader>> {
        let connect = lookup(&self.readers, "reader", &db.dialect)?;
        connect(db.clone()).await
    }

    /// Open a writer for `db`.
    pub async fn open_writer(&self, db: &Database) -> Result<Box<dyn Writer>> {
        let connect = lookup(&self.writers, "writer", &db.dialect)?;
        connect(db.clone()).await
    }

    /// Look up a row filter.
    pub fn filter(&self, name: &str) -> Result<Arc<dyn RowFilter>> {
        self.filters
            .get(&key(name))
            .cloned()
            .ok_or_else(|| FerryError::PluginNotFound {
                capability: "filter",
                name: name.to_string(),
            })
    }

    /// Whether every capability needed to read from and write to `dialect`
    /// is registered.
    pub fn has_dialect(&self, dialect: &str) -> bool {
        let k = key(dialect);
        self.assistants.contains_key(&k) && self.readers.contains_key(&k) && self.writers.contains_key(&k)
    }

    /// Registered dialect names (those with a reader), sorted.
    pub fn dialect_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.readers.keys().cloned().collect();
        names.sort();
        names
    }
}

fn lookup<C: Clone>(map: &HashMap<String, C>, capability: &'static str, name: &str) -> Result<C> {
    map.get(&key(name))
        .cloned()
        .ok_or_else(|| FerryError::PluginNotFound {
            capability,
            name: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryStore;

    #[tokio::test]
    async fn test_unknown_dialect_is_plugin_not_found() {
        let registry = PluginRegistry::new();
        let err = match registry.open_reader(&Database::new("oracle")).await {
            Err(e) => e,
            Ok(_) => panic!("expected lookup failure"),
        };
        assert!(matches!(
            err,
            FerryError::PluginNotFound { capability: "reader", .. }
        ));
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let mut registry = PluginRegistry::new();
        registry.register_memory("Memory", MemoryStore::new());
        assert!(registry.has_dialect("MEMORY"));
        assert!(registry.open_writer(&Database::new("memory")).await.is_ok());
    }

    #[test]
    fn test_builtin_filters() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.filter("TRIM").unwrap().name(), "trim");
        assert_eq!(registry.filter("mask").unwrap().name(), "mask");
        assert!(registry.filter("rot13").is_err());
    }

    #[cfg(all(feature = "postgres", feature = "mssql"))]
    #[test]
    fn test_builtin_aliases() {
        let registry = PluginRegistry::with_builtins();
        for name in ["postgres", "PostgreSQL", "pg", "mssql", "SqlServer"] {
            assert!(registry.has_dialect(name), "missing {}", name);
        }
    }
}
