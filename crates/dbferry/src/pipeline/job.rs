//! Table job (Command pattern) describing one table's transfer.
//!
//! A [`TableJob`] carries everything the pipeline needs: the resolved table,
//! where to read from, where to write to, and the run options. The pipeline
//! answers with a [`TableOutcome`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Database, RowFilter, Table};
use crate::state::Status;

/// One table's unit of work.
#[derive(Clone)]
pub struct TableJob {
    /// Resolved table (fields, total, strategy filled in).
    pub table: Table,

    /// Position of the table in the owning task's state.
    pub index: usize,

    /// Sources, read in order.
    pub sources: Vec<Database>,

    /// Destination.
    pub dest: Database,

    /// Log and skip a failing source instead of failing the table.
    pub skip_failed_sources: bool,

    /// Page windows fetched per query; also sets the backpressure bound.
    pub read_pages: usize,

    /// Wrap the writes in a destination transaction.
    pub with_transaction: bool,

    /// Resolved row filter.
    pub filter: Option<Arc<dyn RowFilter>>,
}

impl fmt::Debug for TableJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableJob")
            .field("table", &self.table.name)
            .field("index", &self.index)
            .field("sources", &self.sources.len())
            .field("dest", &self.dest.server())
            .field("skip_failed_sources", &self.skip_failed_sources)
            .field("read_pages", &self.read_pages)
            .field("with_transaction", &self.with_transaction)
            .field("filter", &self.filter.as_ref().map(|f| f.name().to_string()))
            .finish()
    }
}

impl TableJob {
    /// Create a job reading `table` from one source.
    pub fn new(table: Table, source: Database, dest: Database) -> Self {
        Self {
            table,
            index: 0,
            sources: vec![source],
            dest,
            skip_failed_sources: false,
            read_pages: 1,
            with_transaction: true,
            filter: None,
        }
    }

    /// Set the task state index.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Read from several sources, skipping the ones that fail.
    pub fn with_sources(mut self, sources: Vec<Database>, skip_failed: bool) -> Self {
        self.sources = sources;
        self.skip_failed_sources = skip_failed;
        self
    }

    /// Set the read-ahead in page windows.
    pub fn with_read_pages(mut self, read_pages: usize) -> Self {
        self.read_pages = read_pages.max(1);
        self
    }

    /// Enable or disable the destination transaction.
    pub fn with_transaction(mut self, with_transaction: bool) -> Self {
        self.with_transaction = with_transaction;
        self
    }

    /// Set the row filter.
    pub fn with_filter(mut self, filter: Arc<dyn RowFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Rows requested per page query.
    pub fn window(&self) -> u64 {
        (self.read_pages.max(1) * self.table.page_size.max(1)) as u64
    }
}

/// Result of running a table job.
#[derive(Debug, Clone, Default)]
pub struct TableOutcome {
    /// Source table name.
    pub table: String,

    /// Destination server label.
    pub server: String,

    /// Destination catalog.
    pub catalog: String,

    /// Final table status: Done, Error or Cancelled.
    pub status: Status,

    /// Rows written to the destination.
    pub rows: u64,

    /// Scripts built by the producer.
    pub scripts: usize,

    /// Largest number of scripts pending at once.
    pub max_queued: usize,

    /// Sources skipped after a failure, with the reason.
    pub skipped_sources: Vec<(String, String)>,

    /// Failure reason.
    pub error: Option<String>,

    /// Wall-clock time.
    pub elapsed: Duration,
}

impl TableOutcome {
    /// Whether the table finished successfully.
    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    /// Rows per second over the table's elapsed time.
    pub fn rows_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_window() {
        let table = Table::new("orders", "id").with_page_size(100);
        let job = TableJob::new(table, Database::new("memory"), Database::new("memory"))
            .with_read_pages(3);
        assert_eq!(job.window(), 300);
    }

    #[test]
    fn test_job_defaults() {
        let job = TableJob::new(
            Table::new("orders", "id"),
            Database::new("memory"),
            Database::new("memory"),
        );
        assert!(job.with_transaction);
        assert!(!job.skip_failed_sources);
        assert_eq!(job.sources.len(), 1);
        assert!(format!("{:?}", job).contains("orders"));
    }

    #[test]
    fn test_outcome_rate() {
        let outcome = TableOutcome {
            rows: 500,
            elapsed: Duration::from_secs(2),
            status: Status::Done,
            ..Default::default()
        };
        assert!(outcome.is_done());
        assert_eq!(outcome.rows_per_sec(), 250.0);
    }
}
