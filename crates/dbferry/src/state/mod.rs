//! Task and table status tracking.
//!
//! Transitions are driven only by the orchestrator and the table pipeline.
//! Observers read [`TaskSnapshot`]s, taken under the per-task lock, so they
//! never see a table counter that disagrees with the task total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Lifecycle state of a task, table or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created or reset, not dispatched.
    #[default]
    Idle,
    /// Dispatched.
    Running,
    /// Finished without errors.
    Done,
    /// Finished with at least one failed table.
    Error,
    /// A table failed while siblings are still running. Always resolves to
    /// [`Status::Error`] when the task finishes.
    RunningError,
    /// Stopped before completion, with no failed table.
    Cancelled,
}

impl Status {
    /// Whether this is a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error | Status::Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Done => "done",
            Status::Error => "error",
            Status::RunningError => "running_error",
            Status::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub status: Status,
    pub progress: u64,
    pub total: u64,
    pub error: Option<String>,
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub status: Status,
    pub progress: u64,
    pub total: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub error_msg: Option<String>,
    pub tables: Vec<TableSnapshot>,
}

#[derive(Debug, Default)]
struct TaskInner {
    status: Status,
    progress: u64,
    total: u64,
    started_at: Option<DateTime<Utc>>,
    error_msg: Option<String>,
    tables: Vec<TableSnapshot>,
}

/// Mutable status of one task and its tables.
#[derive(Debug)]
pub struct TaskState {
    name: String,
    inner: Mutex<TaskInner>,
}

impl TaskState {
    /// Create an idle task state with one entry per table name.
    pub fn new<I, S>(name: impl Into<String>, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = tables
            .into_iter()
            .map(|t| TableSnapshot {
                name: t.into(),
                status: Status::Idle,
                progress: 0,
                total: 0,
                error: None,
            })
            .collect();
        Self {
            name: name.into(),
            inner: Mutex::new(TaskInner {
                tables,
                ..TaskInner::default()
            }),
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    pub async fn status(&self) -> Status {
        self.inner.lock().await.status
    }

    /// Mark the task running and stamp the start time.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        inner.status = Status::Running;
        inner.started_at = Some(Utc::now());
    }

    /// Record a table's row count and recompute the task total.
    pub async fn set_table_total(&self, idx: usize, total: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(t) = inner.tables.get_mut(idx) {
            t.total = total;
        }
        inner.total = inner.tables.iter().map(|t| t.total).sum();
    }

    /// Set a table's status. Error and cancellation have their own methods.
    pub async fn set_table_status(&self, idx: usize, status: Status) {
        let mut inner = self.inner.lock().await;
        if let Some(t) = inner.tables.get_mut(idx) {
            t.status = status;
        }
    }

    /// Add written rows to both the table and the task counters.
    pub async fn add_progress(&self, idx: usize, rows: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(t) = inner.tables.get_mut(idx) {
            t.progress = t.progress.saturating_add(rows);
        }
        inner.progress = inner.progress.saturating_add(rows);
    }

    /// Mark a table failed. The task moves to RunningError and keeps the
    /// first error message it sees.
    pub async fn fail_table(&self, idx: usize, message: impl Into<String>) {
        let message = message.into();
        let mut inner = self.inner.lock().await;
        if let Some(t) = inner.tables.get_mut(idx) {
            t.status = Status::Error;
            t.error = Some(message.clone());
        }
        Self::record_error(&mut inner, message);
    }

    /// Record a task-level failure not tied to one table (e.g. the
    /// destination is unreachable).
    pub async fn fail_task(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        Self::record_error(&mut inner, message.into());
    }

    fn record_error(inner: &mut TaskInner, message: String) {
        if inner.error_msg.is_none() {
            inner.error_msg = Some(message);
        }
        if inner.status == Status::Running || inner.status == Status::Idle {
            inner.status = Status::RunningError;
        }
    }

    /// Resolve the final task status from the table outcomes.
    ///
    /// Any error (task or table) resolves to Error. Otherwise a cancelled
    /// table resolves to Cancelled; when `cancelled` is set, tables that never
    /// finished are marked Cancelled first. Everything else is Done.
    pub async fn finish(&self, cancelled: bool) -> Status {
        let mut inner = self.inner.lock().await;
        let failed = inner.status == Status::RunningError
            || inner.error_msg.is_some()
            || inner.tables.iter().any(|t| t.status == Status::Error);
        if cancelled {
            for t in inner.tables.iter_mut() {
                if t.status == Status::Idle || t.status == Status::Running {
                    t.status = Status::Cancelled;
                }
            }
        }
        let any_cancelled = inner.tables.iter().any(|t| t.status == Status::Cancelled);

        inner.status = if failed {
            Status::Error
        } else if any_cancelled {
            Status::Cancelled
        } else {
            Status::Done
        };
        inner.status
    }

    /// Return the task and all its tables to Idle with zeroed counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.status = Status::Idle;
        inner.progress = 0;
        inner.total = 0;
        inner.started_at = None;
        inner.error_msg = None;
        for t in inner.tables.iter_mut() {
            t.status = Status::Idle;
            t.progress = 0;
            t.total = 0;
            t.error = None;
        }
    }

    /// Consistent view of the task and its tables.
    pub async fn snapshot(&self) -> TaskSnapshot {
        let inner = self.inner.lock().await;
        TaskSnapshot {
            name: self.name.clone(),
            status: inner.status,
            progress: inner.progress,
            total: inner.total,
            started_at: inner.started_at,
            error_msg: inner.error_msg.clone(),
            tables: inner.tables.clone(),
        }
    }
}

/// Aggregate status over the tasks of an instance.
///
/// Error wins over Cancelled, which wins over Done. Any running (or
/// running-with-error) task makes the instance Running/RunningError.
pub fn aggregate(statuses: &[Status]) -> Status {
    if statuses.is_empty() {
        return Status::Idle;
    }
    if statuses.contains(&Status::RunningError) {
        return Status::RunningError;
    }
    if statuses.contains(&Status::Running) {
        return if statuses.contains(&Status::Error) {
            Status::RunningError
        } else {
            Status::Running
        };
    }
    if statuses.contains(&Status::Error) {
        Status::Error
    } else if statuses.contains(&Status::Cancelled) {
        Status::Cancelled
    } else if statuses.iter().all(|s| *s == Status::Done) {
        Status::Done
    } else if statuses.iter().all(|s| *s == Status::Idle) {
        Status::Idle
    } else {
        Status::Running
    }
}
