//! Run modes: once, daily at a fixed local time, or continuously.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FerryError, Result};

use super::{Instance, Orchestrator, RunResult};

/// How often a profile runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Execute every instance once.
    #[default]
    #[serde(alias = "Once")]
    Once,
    /// Execute every day at a fixed local time until stopped.
    #[serde(alias = "Daily")]
    Daily,
    /// Execute, sleep for an interval, repeat until stopped.
    #[serde(alias = "Continuous")]
    Continuous,
}

/// Drives an orchestrator according to a run mode.
#[derive(Clone)]
pub struct Runner {
    orchestrator: Orchestrator,
    mode: RunMode,
    daily_at: Option<NaiveTime>,
    interval: Duration,
    with_transaction: bool,
    max_runs: Option<usize>,
}

impl Runner {
    pub fn new(orchestrator: Orchestrator, mode: RunMode) -> Self {
        Self {
            orchestrator,
            mode,
            daily_at: None,
            interval: Duration::from_secs(60),
            with_transaction: true,
            max_runs: None,
        }
    }

    /// Local time of day for daily runs.
    pub fn with_daily_at(mut self, at: NaiveTime) -> Self {
        self.daily_at = Some(at);
        self
    }

    /// Pause between continuous runs.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Enable or disable per-table transactions.
    pub fn with_transaction(mut self, with_transaction: bool) -> Self {
        self.with_transaction = with_transaction;
        self
    }

    /// Stop after this many runs.
    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Run until the mode completes, `max_runs` is reached or a stop is
    /// requested. Returns one result per run.
    pub async fn run(&self, instances: &[Instance]) -> Result<Vec<RunResult>> {
        let mut results = Vec::new();
        match self.mode {
            RunMode::Once => {
                results.push(self.pass(instances, false).await);
            }
            RunMode::Daily => {
                let at = self.daily_at.ok_or_else(|| {
                    FerryError::Config("daily mode requires daily_at".to_string())
                })?;
                loop {
                    let wait = until_next(at, Local::now().naive_local());
                    info!("Next daily run at {} (in {:?})", at, wait);
                    if !self.sleep(wait).await || self.orchestrator.is_stopped() {
                        break;
                    }
                    results.push(self.pass(instances, true).await);
                    if self.done(&results) {
                        break;
                    }
                }
            }
            RunMode::Continuous => loop {
                let rerun = !results.is_empty();
                results.push(self.pass(instances, rerun).await);
                if self.done(&results) {
                    break;
                }
                info!("Next run in {:?}", self.interval);
                if !self.sleep(self.interval).await || self.orchestrator.is_stopped() {
                    break;
                }
            },
        }
        Ok(results)
    }

    /// Execute every instance once. A rerun zeroes counters but keeps a
    /// pending stop, so a stop that lands between runs still ends the loop.
    async fn pass(&self, instances: &[Instance], reset: bool) -> RunResult {
        if reset {
            for instance in instances {
                instance.reset().await;
            }
        }
        self.orchestrator
            .execute(instances, self.with_transaction)
            .await
    }

    fn done(&self, results: &[RunResult]) -> bool {
        self.orchestrator.is_stopped() || self.max_runs.is_some_and(|max| results.len() >= max)
    }

    /// Sleep unless a stop is requested first. Returns false on stop.
    async fn sleep(&self, wait: Duration) -> bool {
        let cancel = self.orchestrator.cancellation_token();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

/// Time until the next occurrence of `at` after `now`.
pub fn until_next(at: NaiveTime, now: NaiveDateTime) -> Duration {
    let today = now.date().and_time(at);
    let target = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Database, PluginRegistry, Table, Value};
    use crate::drivers::memory::register;
    use crate::drivers::MemoryStore;
    use crate::orchestrator::{EngineSettings, Task, TaskKind};
    use crate::state::Status;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_until_next_later_today() {
        let wait = until_next(NaiveTime::from_hms_opt(2, 30, 0).unwrap(), at(1, 0));
        assert_eq!(wait, Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_until_next_wraps_to_tomorrow() {
        let wait = until_next(NaiveTime::from_hms_opt(2, 30, 0).unwrap(), at(2, 30));
        assert_eq!(wait, Duration::from_secs(24 * 3600));
    }

    fn people(rows: i64) -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("people", &["id", "name"], &["id"], &[]);
        store.insert_rows(
            "people",
            (1..=rows).map(|i| vec![Value::I64(i), Value::from(format!("p{}", i))]),
        );
        store
    }

    fn copy_instance(src: &MemoryStore, dst: &MemoryStore) -> (Orchestrator, Vec<Instance>) {
        let mut registry = PluginRegistry::new();
        register(&mut registry, "src", src.clone());
        register(&mut registry, "dst", dst.clone());
        let settings = EngineSettings {
            threads: 1,
            read_pages: 1,
        };
        let instance = Instance::new(
            "main",
            vec![Task::new(
                "copy",
                TaskKind::Migration,
                vec![Database::new("src")],
                Database::new("dst"),
                vec![Table::new("people", "id").with_keys(["id"])],
            )],
        );
        (Orchestrator::new(registry, settings), vec![instance])
    }

    #[tokio::test]
    async fn test_rerun_keeps_pending_stop() {
        let (src, dst) = (people(5), people(0));
        let (orchestrator, instances) = copy_instance(&src, &dst);
        let runner = Runner::new(orchestrator.clone(), RunMode::Continuous);

        let first = runner.pass(&instances, false).await;
        assert_eq!(first.status, Status::Done);
        assert_eq!(dst.row_count("people"), 5);

        // Stop lands after the interval elapsed, before the rerun resets.
        orchestrator.stop();
        let second = runner.pass(&instances, true).await;
        assert_eq!(second.status, Status::Cancelled);
        assert!(orchestrator.is_stopped());
        assert_eq!(dst.row_count("people"), 5);
    }

    #[tokio::test]
    async fn test_explicit_reset_clears_stop() {
        let (orchestrator, instances) = copy_instance(&people(1), &people(0));
        orchestrator.stop();
        orchestrator.reset(&instances[0]).await;
        assert!(!orchestrator.is_stopped());
    }

    #[test]
    fn test_run_mode_names() {
        let mode: RunMode = serde_yaml::from_str("continuous").unwrap();
        assert_eq!(mode, RunMode::Continuous);
        let mode: RunMode = serde_yaml::from_str("Daily").unwrap();
        assert_eq!(mode, RunMode::Daily);
    }
}
