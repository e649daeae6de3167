//! Per-table producer/consumer pipeline.
//!
//! The producer is a spawned task that owns the reader connection(s): it
//! requests page windows, turns them into scripts and pushes them into a
//! [`ScriptQueue`]. The consumer runs on the calling task, owns the writer
//! connection and executes scripts in order. The call returns once both
//! sides have stopped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Database, PluginRegistry, QueryParams, Reader, ScriptBuilder};
use crate::error::{ErrorKind, FerryError, Result};
use crate::state::{Status, TaskState};

use super::job::{TableJob, TableOutcome};
use super::queue::ScriptQueue;

/// How one source's extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceEnd {
    /// Last page was short.
    Exhausted,
    /// Stop was requested.
    Cancelled,
    /// The consumer aborted the queue.
    Aborted,
}

#[derive(Debug, Default)]
struct ProducerReport {
    scripts: usize,
    rows: u64,
    cancelled: bool,
    skipped_sources: Vec<(String, String)>,
    error: Option<FerryError>,
}

/// Run one table's transfer to completion.
///
/// Updates the table's entry in `state` (status, progress, error) and
/// returns the outcome. Never fails: every error becomes an Error outcome.
pub async fn run_table(
    registry: Arc<PluginRegistry>,
    job: TableJob,
    state: Arc<TaskState>,
    cancel: CancellationToken,
) -> TableOutcome {
    let start = Instant::now();
    let table_name = job.table.name.clone();
    let idx = job.index;

    state.set_table_status(idx, Status::Running).await;
    info!(
        "{}: starting transfer ({} rows, page size {}, strategy {:?}, sources {})",
        table_name,
        job.table.total,
        job.table.page_size,
        job.table.strategy,
        job.sources.len()
    );

    let mut outcome = TableOutcome {
        table: table_name.clone(),
        server: job.dest.server(),
        catalog: job.dest.catalog.clone(),
        ..Default::default()
    };

    let result = transfer(registry, &job, &state, cancel, &mut outcome).await;
    outcome.elapsed = start.elapsed();

    match result {
        Ok(status) => {
            outcome.status = status;
            state.set_table_status(idx, status).await;
            match status {
                Status::Cancelled => info!(
                    "{}: cancelled after {} rows",
                    table_name, outcome.rows
                ),
                _ => info!(
                    "{}: transferred {} rows in {:?} ({:.0} rows/sec)",
                    table_name,
                    outcome.rows,
                    outcome.elapsed,
                    outcome.rows_per_sec()
                ),
            }
        }
        Err(e) => {
            let message = e.to_string();
            warn!("{}: failed: {}", table_name, message);
            outcome.status = Status::Error;
            outcome.error = Some(message.clone());
            state.fail_table(idx, message).await;
        }
    }

    outcome
}

async fn transfer(
    registry: Arc<PluginRegistry>,
    job: &TableJob,
    state: &Arc<TaskState>,
    cancel: CancellationToken,
    outcome: &mut TableOutcome,
) -> Result<Status> {
    let table = &job.table;
    let mut writer = registry.open_writer(&job.dest).await?;

    if job.with_transaction {
        if let Err(e) = writer.begin_transaction().await {
            writer.close().await;
            return Err(e);
        }
    }

    let queue = Arc::new(ScriptQueue::for_read_pages(job.read_pages));
    let builder = writer.script_builder();

    let producer = {
        let registry = registry.clone();
        let job = job.clone();
        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let produced = AssertUnwindSafe(produce(&registry, &job, builder, &queue, &cancel))
                .catch_unwind()
                .await;
            queue.close().await;
            produced.unwrap_or_else(|panic| ProducerReport {
                error: Some(FerryError::read(
                    &job.table.name,
                    format!("producer panicked: {}", panic_message(panic.as_ref())),
                )),
                ..Default::default()
            })
        })
    };

    let mut consumer_error = None;
    while let Some(script) = queue.pop().await {
        let covered = script.rows;
        match writer.exec_script(table, script).await {
            Ok(written) => {
                outcome.rows += written;
                state.add_progress(job.index, written).await;
                debug!(
                    "{}: script of {} rows executed ({} written so far)",
                    table.name, covered, outcome.rows
                );
            }
            Err(e) => {
                queue.abort().await;
                consumer_error = Some(e);
                break;
            }
        }
    }

    let report = match producer.await {
        Ok(report) => report,
        Err(e) => ProducerReport {
            error: Some(FerryError::read(&table.name, format!("producer task failed: {}", e))),
            ..Default::default()
        },
    };

    outcome.scripts = report.scripts;
    outcome.max_queued = queue.high_water().await;
    outcome.skipped_sources = report.skipped_sources;

    let status = if let Some(e) = consumer_error.or(report.error) {
        Err(e)
    } else if report.cancelled {
        Ok(Status::Cancelled)
    } else {
        Ok(Status::Done)
    };

    let finished = finalize(writer.as_mut(), job, status).await;
    writer.close().await;
    finished
}

/// Commit on Done, roll back otherwise.
async fn finalize(
    writer: &mut dyn crate::core::Writer,
    job: &TableJob,
    status: Result<Status>,
) -> Result<Status> {
    if !job.with_transaction {
        return status;
    }

    match status {
        Ok(Status::Done) => {
            writer.commit().await?;
            debug!("{}: committed", job.table.name);
            Ok(Status::Done)
        }
        other => {
            if let Err(e) = writer.rollback().await {
                warn!("{}: rollback failed: {}", job.table.name, e);
            } else {
                debug!("{}: rolled back", job.table.name);
            }
            other
        }
    }
}

async fn produce(
    registry: &PluginRegistry,
    job: &TableJob,
    builder: Arc<dyn ScriptBuilder>,
    queue: &ScriptQueue,
    cancel: &CancellationToken,
) -> ProducerReport {
    let mut report = ProducerReport::default();
    let mut last_error = None;

    for source in &job.sources {
        match produce_source(registry, job, source, builder.as_ref(), queue, cancel, &mut report)
            .await
        {
            Ok(SourceEnd::Exhausted) => {}
            Ok(SourceEnd::Cancelled) => {
                report.cancelled = true;
                return report;
            }
            Ok(SourceEnd::Aborted) => return report,
            Err(e) if job.skip_failed_sources && is_source_failure(&e) => {
                warn!(
                    "{}: skipping source {}: {}",
                    job.table.name,
                    source.server(),
                    e
                );
                report.skipped_sources.push((source.server(), e.to_string()));
                last_error = Some(e);
            }
            Err(e) => {
                report.error = Some(e);
                return report;
            }
        }
    }

    if report.skipped_sources.len() == job.sources.len() {
        report.error = Some(last_error.unwrap_or_else(|| {
            FerryError::read(&job.table.name, "no source configured")
        }));
    }

    report
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn is_source_failure(e: &FerryError) -> bool {
    matches!(e.kind(), ErrorKind::Read | ErrorKind::Connect)
}

async fn produce_source(
    registry: &PluginRegistry,
    job: &TableJob,
    source: &Database,
    builder: &dyn ScriptBuilder,
    queue: &ScriptQueue,
    cancel: &CancellationToken,
    report: &mut ProducerReport,
) -> Result<SourceEnd> {
    let mut reader = registry.open_reader(source).await?;
    let result = paginate(reader.as_mut(), job, builder, queue, cancel, report).await;
    reader.close().await;
    result
}

async fn paginate(
    reader: &mut dyn Reader,
    job: &TableJob,
    builder: &dyn ScriptBuilder,
    queue: &ScriptQueue,
    cancel: &CancellationToken,
    report: &mut ProducerReport,
) -> Result<SourceEnd> {
    let table = &job.table;
    let filter = job.filter.as_deref();
    let window = job.window();
    let watermark_key = if reader.supports_watermark() {
        table.single_key()
    } else {
        None
    };
    let mut params = match watermark_key {
        Some(key) => {
            debug!("{}: using keyset pagination on {}", table.name, key);
            QueryParams::keyset(key)
        }
        None => {
            debug!("{}: using row-offset pagination", table.name);
            QueryParams::default()
        }
    };
    let mut from_row = 1u64;

    loop {
        if cancel.is_cancelled() {
            debug!("{}: stop requested, no further pages", table.name);
            return Ok(SourceEnd::Cancelled);
        }
        if queue.is_aborted().await {
            return Ok(SourceEnd::Aborted);
        }

        let to_row = from_row + window - 1;
        let mut cursor = reader.query_page(table, from_row, to_row, &params).await?;
        if let Some(key) = watermark_key {
            if !cursor.track_key(key) {
                return Err(FerryError::read(
                    &table.name,
                    format!("key field '{}' missing from page", key),
                ));
            }
        }

        let fetched = cursor.remaining() as u64;
        debug!(
            "{}: fetched {} rows (requested {}..={})",
            table.name, fetched, from_row, to_row
        );

        while let Some(script) = builder.build_script(table, &mut cursor, filter)? {
            report.scripts += 1;
            report.rows += script.rows as u64;
            if !queue.push(script).await {
                return Ok(SourceEnd::Aborted);
            }
        }

        if fetched < window {
            return Ok(SourceEnd::Exhausted);
        }

        match watermark_key {
            Some(_) => match cursor.max_key() {
                Some(max) => params.watermark = Some(max.clone()),
                None => return Ok(SourceEnd::Exhausted),
            },
            None => from_row = to_row + 1,
        }
    }
}
