//! Transfer orchestrator - main workflow coordinator.
//!
//! Instances run in parallel (bounded by the global thread count), the
//! tasks of an instance run one after the other, and the tables of a task
//! run level by level through a fixed-size worker pool.

mod dispatch;
pub mod levels;
mod schedule;
mod strategy;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Database, PluginRegistry, QueryParams, Reader, RowFilter, Table, WriteStrategy};
use crate::error::{FerryError, Result};
use crate::pipeline::{run_table, TableJob};
use crate::report::{ReportSink, TableRecord, TracingReport};
use crate::state::{aggregate, Status, TaskSnapshot, TaskState};

pub use dispatch::dispatch;
pub use levels::{group_levels, merge_references, resolve, Leveled, LEVEL_STEP};
pub use schedule::{RunMode, Runner};
pub use strategy::{SourceStrategy, TaskKind};

/// Engine-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Outer pool size (instances in parallel) and default per-task pool
    /// size (tables in parallel).
    pub threads: usize,

    /// Page windows per query; the script queue holds `read_pages * 3`.
    pub read_pages: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            read_pages: 1,
        }
    }
}

/// One source/destination pairing and its tables.
#[derive(Debug)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub sources: Vec<Database>,
    pub dest: Database,
    pub tables: Vec<Table>,
    /// Table pool size; the engine default when unset.
    pub threads: Option<usize>,
    pub state: Arc<TaskState>,
}

impl Task {
    /// Create a task with an idle state.
    pub fn new(
        name: impl Into<String>,
        kind: TaskKind,
        sources: Vec<Database>,
        dest: Database,
        tables: Vec<Table>,
    ) -> Self {
        let name = name.into();
        let state = Arc::new(TaskState::new(
            name.clone(),
            tables.iter().map(|t| t.name.clone()),
        ));
        Self {
            name,
            kind,
            sources,
            dest,
            tables,
            threads: None,
            state,
        }
    }

    /// Set the table pool size.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    /// Database used for discovery and counts.
    pub fn primary_source(&self) -> Option<&Database> {
        match self.kind.source_strategy() {
            SourceStrategy::SameAsDest => Some(&self.dest),
            _ => self.sources.first(),
        }
    }
}

/// Tasks that run serially, in parallel with other instances.
#[derive(Debug, Clone)]
pub struct Instance {
    pub name: String,
    pub tasks: Vec<Arc<Task>>,
}

impl Instance {
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            tasks: tasks.into_iter().map(Arc::new).collect(),
        }
    }

    /// Aggregate status over the instance's tasks.
    pub async fn status(&self) -> Status {
        let mut statuses = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            statuses.push(task.state.status().await);
        }
        aggregate(&statuses)
    }

    /// Snapshots of every task.
    pub async fn snapshots(&self) -> Vec<TaskSnapshot> {
        let mut snaps = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            snaps.push(task.state.snapshot().await);
        }
        snaps
    }

    async fn reset(&self) {
        for task in &self.tasks {
            task.state.reset().await;
        }
    }
}

/// Resolved table in a task plan.
#[derive(Debug, Clone)]
pub struct PlannedTable {
    /// Position in the task's table list.
    pub index: usize,
    pub table: Table,
    pub filter: Option<Arc<dyn RowFilter>>,
}

impl Leveled for PlannedTable {
    fn level_name(&self) -> &str {
        &self.table.name
    }
    fn level_references(&self) -> &[String] {
        &self.table.references
    }
    fn level(&self) -> i32 {
        self.table.order
    }
    fn set_level(&mut self, level: i32) {
        self.table.order = level;
    }
    fn level_weight(&self) -> u64 {
        self.table.weight()
    }
}

/// Discovery result for one task.
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    /// Ascending dependency levels.
    pub levels: Vec<(i32, Vec<PlannedTable>)>,
    /// Tables dropped from the run, with the reason.
    pub excluded: Vec<(String, String)>,
    /// Tables left at level 0 by an unresolved reference cycle.
    pub unresolved: Vec<String>,
}

/// Serializable summary of a task plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub instance: String,
    pub task: String,
    pub kind: TaskKind,
    pub levels: Vec<LevelSummary>,
    pub excluded: Vec<ExcludedTable>,
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: i32,
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub name: String,
    pub dest_name: String,
    pub total: u64,
    pub fields: usize,
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedTable {
    pub name: String,
    pub reason: String,
}

impl TaskPlan {
    fn summarize(&self, instance: &str, task: &Task) -> PlanSummary {
        PlanSummary {
            instance: instance.to_string(),
            task: task.name.clone(),
            kind: task.kind,
            levels: self
                .levels
                .iter()
                .map(|(level, tables)| LevelSummary {
                    level: *level,
                    tables: tables
                        .iter()
                        .map(|p| TableSummary {
                            name: p.table.name.clone(),
                            dest_name: p.table.dest_name.clone(),
                            total: p.table.total,
                            fields: p.table.dest_fields.len(),
                            references: p.table.references.clone(),
                        })
                        .collect(),
                })
                .collect(),
            excluded: self
                .excluded
                .iter()
                .map(|(name, reason)| ExcludedTable {
                    name: name.clone(),
                    reason: reason.clone(),
                })
                .collect(),
            unresolved: self.unresolved.clone(),
        }
    }
}

/// Result of an execute run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: Status,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tasks run.
    pub tasks_total: usize,

    /// Tables in the run.
    pub tables_total: usize,

    /// Tables that finished.
    pub tables_done: usize,

    /// Tables that failed (including excluded ones).
    pub tables_failed: usize,

    /// Tables stopped before finishing.
    pub tables_cancelled: usize,

    /// Total rows written.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Failed tables as `task/table`.
    pub failed_tables: Vec<String>,

    /// Per-task final snapshots.
    pub tasks: Vec<TaskSnapshot>,
}

impl RunResult {
    /// Convert to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn from_snapshots(
        run_id: String,
        started_at: DateTime<Utc>,
        tasks: Vec<TaskSnapshot>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let mut result = Self {
            run_id,
            status: aggregate(&tasks.iter().map(|t| t.status).collect::<Vec<_>>()),
            started_at,
            completed_at,
            duration_seconds,
            tasks_total: tasks.len(),
            tables_total: 0,
            tables_done: 0,
            tables_failed: 0,
            tables_cancelled: 0,
            rows_transferred: 0,
            rows_per_second: 0,
            failed_tables: Vec::new(),
            tasks: Vec::new(),
        };

        for task in &tasks {
            for table in &task.tables {
                result.tables_total += 1;
                result.rows_transferred += table.progress;
                match table.status {
                    Status::Done => result.tables_done += 1,
                    Status::Error => {
                        result.tables_failed += 1;
                        result.failed_tables.push(format!("{}/{}", task.name, table.name));
                    }
                    Status::Cancelled => result.tables_cancelled += 1,
                    _ => {}
                }
            }
        }

        if duration_seconds > 0.0 {
            result.rows_per_second = (result.rows_transferred as f64 / duration_seconds) as u64;
        }
        result.tasks = tasks;
        result
    }
}

/// Transfer orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    settings: EngineSettings,
    report: Arc<dyn ReportSink>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl Orchestrator {
    /// Create an orchestrator reporting through `tracing`.
    pub fn new(registry: PluginRegistry, settings: EngineSettings) -> Self {
        Self {
            registry: Arc::new(registry),
            settings,
            report: Arc::new(TracingReport),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Set the report sink.
    pub fn with_report(mut self, report: Arc<dyn ReportSink>) -> Self {
        self.report = report;
        self
    }

    /// Engine settings.
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Plugin registry.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Current cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Request a cooperative stop of everything running.
    ///
    /// Tables in flight finish their current page and scripts already
    /// queued; no new pages are read and no new tables are claimed.
    pub fn stop(&self) {
        info!("Stop requested");
        self.cancellation_token().cancel();
    }

    /// Whether a stop has been requested since the last reset.
    pub fn is_stopped(&self) -> bool {
        self.cancellation_token().is_cancelled()
    }

    /// Return an instance to Idle with zeroed counters and clear a previous
    /// stop request. Scheduled reruns zero counters without clearing a stop.
    pub async fn reset(&self, instance: &Instance) {
        instance.reset().await;
        let mut token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        debug!("{}: reset", instance.name);
    }

    /// Discovery only: resolve fields, counts and levels of every task of
    /// an instance and check connectivity. Nothing is written and the
    /// instance's state is untouched.
    pub async fn prefetch(&self, instance: &Instance) -> Result<Vec<PlanSummary>> {
        let mut summaries = Vec::with_capacity(instance.tasks.len());
        for task in &instance.tasks {
            let scratch = TaskState::new(task.name.clone(), task.tables.iter().map(|t| t.name.clone()));
            let plan = self.plan(task, &scratch).await?;
            summaries.push(plan.summarize(&instance.name, task));
        }
        Ok(summaries)
    }

    /// Run every instance, instances in parallel.
    pub async fn execute(&self, instances: &[Instance], with_transaction: bool) -> RunResult {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.cancellation_token();
        info!(
            "Starting run {} ({} instances, {} threads, transaction: {})",
            run_id,
            instances.len(),
            self.settings.threads,
            with_transaction
        );

        let orchestrator = self.clone();
        let worker_cancel = cancel.clone();
        let (_, unclaimed) = dispatch(
            instances.to_vec(),
            self.settings.threads,
            &cancel,
            move |instance: Instance| {
                let orchestrator = orchestrator.clone();
                let cancel = worker_cancel.clone();
                async move {
                    orchestrator
                        .execute_instance(&instance, with_transaction, &cancel)
                        .await
                }
            },
        )
        .await;

        for instance in &unclaimed {
            info!("{}: not started (stop requested)", instance.name);
            for task in &instance.tasks {
                task.state.finish(true).await;
            }
        }

        let mut snapshots = Vec::new();
        for instance in instances {
            snapshots.extend(instance.snapshots().await);
        }
        let result = RunResult::from_snapshots(run_id, started_at, snapshots);

        info!(
            "Run {}: {} tables ({} done, {} failed, {} cancelled), {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.tables_total,
            result.tables_done,
            result.tables_failed,
            result.tables_cancelled,
            result.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );
        result
    }

    /// Run the tasks of one instance serially.
    pub async fn execute_instance(
        &self,
        instance: &Instance,
        with_transaction: bool,
        cancel: &CancellationToken,
    ) -> Status {
        info!("{}: starting {} tasks", instance.name, instance.tasks.len());
        for task in &instance.tasks {
            if cancel.is_cancelled() {
                task.state.finish(true).await;
                continue;
            }
            self.execute_task(&instance.name, task, with_transaction, cancel)
                .await;
        }
        let status = instance.status().await;
        info!("{}: {}", instance.name, status);
        status
    }

    async fn execute_task(
        &self,
        instance: &str,
        task: &Arc<Task>,
        with_transaction: bool,
        cancel: &CancellationToken,
    ) -> Status {
        task.state.start().await;
        info!("{}/{}: starting {} task", instance, task.name, task.kind);

        let plan = match self.plan(task, &task.state).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("{}/{}: {}", instance, task.name, e);
                task.state.fail_task(e.to_string()).await;
                for (idx, t) in task.tables.iter().enumerate() {
                    task.state.fail_table(idx, e.to_string()).await;
                    self.report.on_table(&TableRecord::failed(
                        instance,
                        &task.name,
                        &task.dest.server(),
                        &t.name,
                        e.to_string(),
                    ));
                }
                return task.state.finish(cancel.is_cancelled()).await;
            }
        };

        for (name, reason) in &plan.excluded {
            self.report.on_table(&TableRecord::failed(
                instance,
                &task.name,
                &task.dest.server(),
                name,
                reason.clone(),
            ));
        }

        let threads = task.threads.unwrap_or(self.settings.threads).max(1);
        let strategy = task.kind.source_strategy();
        let sources = strategy.sources(&task.sources, &task.dest);

        for (level, tables) in plan.levels {
            if cancel.is_cancelled() {
                break;
            }
            info!(
                "{}/{}: level {} ({} tables, {} workers)",
                instance,
                task.name,
                level,
                tables.len(),
                threads
            );

            let jobs: Vec<TableJob> = tables
                .into_iter()
                .map(|p| {
                    let mut job = TableJob::new(p.table, task.dest.clone(), task.dest.clone())
                        .with_index(p.index)
                        .with_sources(sources.clone(), strategy.skips_failed_sources())
                        .with_read_pages(self.settings.read_pages)
                        .with_transaction(with_transaction);
                    job.filter = p.filter;
                    job
                })
                .collect();

            let registry = self.registry.clone();
            let state = task.state.clone();
            let worker_cancel = cancel.clone();
            let (outcomes, unclaimed) = dispatch(jobs, threads, cancel, move |job: TableJob| {
                run_table(
                    registry.clone(),
                    job,
                    state.clone(),
                    worker_cancel.clone(),
                )
            })
            .await;

            for outcome in &outcomes {
                self.report
                    .on_table(&TableRecord::from_outcome(instance, &task.name, outcome));
            }
            for job in &unclaimed {
                task.state.set_table_status(job.index, Status::Cancelled).await;
            }
        }

        let status = task.state.finish(cancel.is_cancelled()).await;
        info!("{}/{}: {}", instance, task.name, status);
        status
    }

    /// Resolve a task's tables: fields, counts, filters, levels.
    ///
    /// Connection failures are fatal to the task. A table whose metadata
    /// cannot be resolved is excluded and marked failed in `state`.
    async fn plan(&self, task: &Task, state: &TaskState) -> Result<TaskPlan> {
        let primary = task
            .primary_source()
            .ok_or_else(|| FerryError::Config(format!("task {} has no source", task.name)))?;

        // Destination reachable?
        let mut writer = self.registry.open_writer(&task.dest).await?;
        writer.close().await;

        let mut assistant = self.registry.open_assistant(primary).await?;
        let discovered = match assistant.get_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                warn!(
                    "{}: table discovery failed, using configured references only: {}",
                    task.name, e
                );
                Vec::new()
            }
        };
        debug!("{}: discovered {} tables", task.name, discovered.len());

        let mut counters = self.open_counters(task).await?;

        let mut plan = TaskPlan::default();
        let mut planned = Vec::with_capacity(task.tables.len());
        let mut configured: Vec<Table> = task.tables.clone();
        merge_references(&mut configured, &discovered);

        let total_tables = configured.len();
        for (index, mut table) in configured.into_iter().enumerate() {
            strategy::apply(task.kind, &mut table);
            match self
                .resolve_table(&mut table, assistant.as_mut(), &mut counters)
                .await
            {
                Ok(filter) => {
                    state.set_table_total(index, table.total).await;
                    planned.push(PlannedTable {
                        index,
                        table,
                        filter,
                    });
                }
                Err(e) => {
                    warn!("{}: excluding {}: {}", task.name, table.name, e);
                    state.fail_table(index, e.to_string()).await;
                    plan.excluded.push((table.name.clone(), e.to_string()));
                }
            }
            self.report.on_progress(total_tables, index + 1);
        }

        assistant.close().await;
        for (_, reader) in counters.iter_mut() {
            reader.close().await;
        }

        if task.kind.is_leveled() {
            plan.unresolved = resolve(&mut planned);
        } else {
            for p in planned.iter_mut() {
                p.table.order = LEVEL_STEP;
            }
        }
        plan.levels = group_levels(planned);
        Ok(plan)
    }

    /// Open one counting reader per source. In integration tasks an
    /// unreachable source is skipped; otherwise it fails the task.
    async fn open_counters(&self, task: &Task) -> Result<Vec<(String, Box<dyn Reader>)>> {
        let strategy = task.kind.source_strategy();
        let mut counters = Vec::new();
        for db in strategy.sources(&task.sources, &task.dest) {
            match self.registry.open_reader(&db).await {
                Ok(reader) => counters.push((db.server(), reader)),
                Err(e) if strategy.skips_failed_sources() => {
                    warn!("{}: source {} unavailable: {}", task.name, db.server(), e);
                }
                Err(e) => return Err(e),
            }
        }
        if counters.is_empty() {
            return Err(FerryError::connect(
                task.name.clone(),
                "no source reachable",
            ));
        }
        Ok(counters)
    }

    async fn resolve_table(
        &self,
        table: &mut Table,
        assistant: &mut dyn crate::core::Assistant,
        counters: &mut [(String, Box<dyn Reader>)],
    ) -> Result<Option<Arc<dyn RowFilter>>> {
        let filter = match &table.filter {
            Some(name) => Some(self.registry.filter(name)?),
            None => None,
        };

        let fields = assistant
            .get_fields(&table.name)
            .await
            .map_err(|e| FerryError::discovery(&table.name, e))?;
        if fields.is_empty() {
            return Err(FerryError::discovery(&table.name, "no fields found"));
        }

        if table.strategy != WriteStrategy::Append && table.key_fields.is_empty() {
            return Err(FerryError::discovery(
                &table.name,
                format!("{:?} writes require keyFields", table.strategy),
            ));
        }
        for key in &table.key_fields {
            if !fields.iter().any(|f| f.eq_ignore_ascii_case(key)) {
                return Err(FerryError::discovery(
                    &table.name,
                    format!("key field '{}' not found", key),
                ));
            }
        }

        table.dest_fields = fields
            .iter()
            .filter(|f| !table.is_skipped(f))
            .cloned()
            .collect();
        table.source_fields = fields;
        if table.dest_fields.is_empty() {
            return Err(FerryError::discovery(&table.name, "every field is skipped"));
        }

        let params = QueryParams::default();
        let mut total = 0u64;
        let mut counted = 0usize;
        let many = counters.len() > 1;
        for (server, reader) in counters.iter_mut() {
            match reader.query_count(table, &params).await {
                Ok(n) => {
                    total += n;
                    counted += 1;
                }
                Err(e) if many => warn!("{}: count on {} failed: {}", table.name, server, e),
                Err(e) => return Err(FerryError::discovery(&table.name, e)),
            }
        }
        if counted == 0 {
            return Err(FerryError::discovery(&table.name, "row count failed on every source"));
        }
        table.total = total;

        debug!(
            "{}: {} fields, {} rows, strategy {:?}",
            table.name,
            table.dest_fields.len(),
            table.total,
            table.strategy
        );
        Ok(filter)
    }
}
