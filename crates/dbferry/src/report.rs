//! Progress and per-table outcome reporting.
//!
//! The engine calls [`ReportSink::on_progress`] while discovering tables and
//! [`ReportSink::on_table`] once per table outcome. How records are shown or
//! stored is up to the sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::pipeline::TableOutcome;
use crate::state::Status;

/// One table outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub instance: String,
    pub task: String,
    pub server: String,
    pub catalog: String,
    pub table: String,
    pub status: Status,
    pub rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_sources: Vec<String>,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl TableRecord {
    /// Build a record from a pipeline outcome.
    pub fn from_outcome(instance: &str, task: &str, outcome: &TableOutcome) -> Self {
        Self {
            instance: instance.to_string(),
            task: task.to_string(),
            server: outcome.server.clone(),
            catalog: outcome.catalog.clone(),
            table: outcome.table.clone(),
            status: outcome.status,
            rows: outcome.rows,
            error: outcome.error.clone(),
            skipped_sources: outcome
                .skipped_sources
                .iter()
                .map(|(server, reason)| format!("{}: {}", server, reason))
                .collect(),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            finished_at: Utc::now(),
        }
    }

    /// Record for a table that never reached the pipeline.
    pub fn failed(instance: &str, task: &str, server: &str, table: &str, error: String) -> Self {
        Self {
            instance: instance.to_string(),
            task: task.to_string(),
            server: server.to_string(),
            catalog: String::new(),
            table: table.to_string(),
            status: Status::Error,
            rows: 0,
            error: Some(error),
            skipped_sources: Vec::new(),
            elapsed_ms: 0,
            finished_at: Utc::now(),
        }
    }
}

/// Receiver of progress and outcome records.
pub trait ReportSink: Send + Sync {
    /// Discovery progress: `done` of `total` tables resolved.
    fn on_progress(&self, _total: usize, _done: usize) {}

    /// A table finished.
    fn on_table(&self, record: &TableRecord);
}

/// Emits records as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReport;

impl ReportSink for TracingReport {
    fn on_progress(&self, total: usize, done: usize) {
        tracing::debug!(total, done, "discovery progress");
    }

    fn on_table(&self, r: &TableRecord) {
        match r.status {
            Status::Error => warn!(
                instance = %r.instance,
                task = %r.task,
                server = %r.server,
                table = %r.table,
                rows = r.rows,
                error = r.error.as_deref().unwrap_or(""),
                "table failed"
            ),
            status => info!(
                instance = %r.instance,
                task = %r.task,
                server = %r.server,
                table = %r.table,
                rows = r.rows,
                elapsed_ms = r.elapsed_ms,
                status = %status,
                "table finished"
            ),
        }
    }
}

/// Appends one JSON object per table outcome to a file.
#[derive(Debug)]
pub struct JsonLinesReport {
    file: Mutex<File>,
}

impl JsonLinesReport {
    /// Open (or create) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ReportSink for JsonLinesReport {
    fn on_table(&self, record: &TableRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize report record for {}: {}", record.table, e);
                return;
            }
        };
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write report record for {}: {}", record.table, e);
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemoryReport {
    records: Mutex<Vec<TableRecord>>,
    progress: Mutex<Vec<(usize, usize)>>,
}

impl MemoryReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far.
    pub fn records(&self) -> Vec<TableRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Progress calls received so far.
    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ReportSink for MemoryReport {
    fn on_progress(&self, total: usize, done: usize) {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((total, done));
    }

    fn on_table(&self, record: &TableRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome() -> TableOutcome {
        TableOutcome {
            table: "orders".into(),
            server: "db1:5432".into(),
            catalog: "shop".into(),
            status: Status::Done,
            rows: 42,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_from_outcome() {
        let r = TableRecord::from_outcome("nightly", "orders-task", &outcome());
        assert_eq!(r.rows, 42);
        assert_eq!(r.elapsed_ms, 1500);
        assert_eq!(r.status, Status::Done);
        assert!(r.error.is_none());
    }

    #[test]
    fn test_json_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.jsonl");
        let sink = JsonLinesReport::open(&path).unwrap();
        let r = TableRecord::from_outcome("i", "t", &outcome());
        sink.on_table(&r);
        sink.on_table(&r);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: TableRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.table, "orders");
        assert_eq!(parsed.status, Status::Done);
    }

    #[test]
    fn test_memory_report() {
        let sink = MemoryReport::new();
        sink.on_progress(3, 1);
        sink.on_table(&TableRecord::failed("i", "t", "db", "x", "boom".into()));
        assert_eq!(sink.progress(), vec![(3, 1)]);
        assert_eq!(sink.records()[0].error.as_deref(), Some("boom"));
    }
}
