//! Core abstractions shared by the engine and the dialect plugins.
//!
//! - [`schema`]: connection descriptors and table metadata
//! - [`value`]: owned field values and rows
//! - [`traits`]: capability contracts (assistant, reader, writer, filter)
//! - [`catalog`]: plugin registry

pub mod catalog;
pub mod schema;
pub mod traits;
pub mod value;

pub use catalog::PluginRegistry;
pub use schema::{Database, Table, TableInfo, WriteMode, WriteStrategy};
pub use traits::{
    next_batch, Assistant, Batch, QueryParams, Reader, RowCursor, RowFilter, Script, ScriptBody,
    ScriptBuilder, Writer,
};
pub use value::{Row, Value};
