//! Per-table transfer pipeline.
//!
//! - [`TableJob`]: Command pattern describing one table's transfer
//! - [`ScriptQueue`]: bounded producer/consumer queue with backpressure
//! - [`run_table`]: runs one job to a Done, Error or Cancelled outcome
//!
//! The pipeline knows nothing about task kinds: the orchestrator resolves
//! the source list and write strategy into the job before dispatching it.

mod job;
mod queue;
mod table;

pub use job::{TableJob, TableOutcome};
pub use queue::ScriptQueue;
pub use table::run_table;
