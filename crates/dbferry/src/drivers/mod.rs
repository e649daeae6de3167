//! Built-in storage plugins and row filters.
//!
//! Each dialect module exposes `register(&mut PluginRegistry, name)` and
//! plugs its assistant, reader and writer into the registry under that
//! name. The relational dialects share [`sql`] for script building.

pub mod filters;
pub mod memory;
pub mod sql;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use filters::{MaskFilter, TrimFilter};
pub use memory::MemoryStore;
pub use sql::{SqlDialect, SqlScriptBuilder};
