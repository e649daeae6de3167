//! # dbferry
//!
//! Dependency-ordered, paginated table transfer between heterogeneous data
//! stores.
//!
//! - **Migration**: one source into one destination
//! - **Integration**: several sources, read in sequence, into one destination
//! - **Masking**: in-place rewrite of sensitive fields by key
//! - **Leveling** of tables by their references, so parents land first
//! - **Per-table transactions** with a bounded producer/consumer pipeline
//! - **Pluggable dialects** (PostgreSQL, SQL Server, in-process memory store)
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbferry::{Orchestrator, PluginRegistry, Profile};
//!
//! #[tokio::main]
//! async fn main() -> dbferry::Result<()> {
//!     let profile = Profile::load("profile.yaml")?;
//!     let orchestrator =
//!         Orchestrator::new(PluginRegistry::with_builtins(), profile.engine_settings());
//!     let instances = profile.instances()?;
//!     let result = orchestrator.execute(&instances, profile.with_transaction).await;
//!     println!("Transferred {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod state;

// Re-exports for convenient access
pub use crate::config::{Format, Profile, TableConfig};
pub use crate::core::{Database, PluginRegistry, Row, Table, Value, WriteMode, WriteStrategy};
pub use crate::drivers::MemoryStore;
pub use crate::error::{ErrorKind, FerryError, Result};
pub use crate::orchestrator::{
    EngineSettings, Instance, Orchestrator, PlanSummary, RunMode, RunResult, Runner, Task,
    TaskKind,
};
pub use crate::report::{JsonLinesReport, MemoryReport, ReportSink, TableRecord, TracingReport};
pub use crate::state::{Status, TableSnapshot, TaskSnapshot};
