//! Task kinds expressed as a source strategy plus a write strategy.
//!
//! Migration, integration and masking run through the same scheduler and
//! pipeline; they differ only in where rows come from, whether a failing
//! source is tolerated, which script shape is built and whether tables are
//! leveled.

use serde::{Deserialize, Serialize};

use crate::core::{Database, Table, WriteMode, WriteStrategy};

/// Kind of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// One source to one destination.
    #[default]
    #[serde(alias = "Migration")]
    Migration,
    /// Several sources, read in sequence, into one destination.
    #[serde(alias = "Integration")]
    Integration,
    /// In-place update of the destination.
    #[serde(alias = "Masking")]
    Masking,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Migration => "migration",
            TaskKind::Integration => "integration",
            TaskKind::Masking => "masking",
        };
        f.write_str(s)
    }
}

/// Where a table's rows are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStrategy {
    /// The task's first source.
    Single,
    /// Every source in order; a failing source is skipped.
    Many,
    /// The destination itself.
    SameAsDest,
}

impl TaskKind {
    /// Source strategy for this kind.
    pub fn source_strategy(self) -> SourceStrategy {
        match self {
            TaskKind::Migration => SourceStrategy::Single,
            TaskKind::Integration => SourceStrategy::Many,
            TaskKind::Masking => SourceStrategy::SameAsDest,
        }
    }

    /// Script shape for a table of this kind.
    pub fn write_strategy(self, mode: WriteMode) -> WriteStrategy {
        match (self, mode) {
            (TaskKind::Masking, _) => WriteStrategy::Mask,
            (_, WriteMode::Update) => WriteStrategy::Upsert,
            (_, WriteMode::Append) => WriteStrategy::Append,
        }
    }

    /// Whether tables are grouped by dependency level.
    pub fn is_leveled(self) -> bool {
        !matches!(self, TaskKind::Masking)
    }
}

impl SourceStrategy {
    /// Resolve the databases a table reads from.
    pub fn sources(self, sources: &[Database], dest: &Database) -> Vec<Database> {
        match self {
            SourceStrategy::Single => sources.iter().take(1).cloned().collect(),
            SourceStrategy::Many => sources.to_vec(),
            SourceStrategy::SameAsDest => vec![dest.clone()],
        }
    }

    /// Whether a failing source is logged and skipped.
    pub fn skips_failed_sources(self) -> bool {
        matches!(self, SourceStrategy::Many)
    }
}

/// Apply the write strategy of `kind` to a table.
pub fn apply(kind: TaskKind, table: &mut Table) {
    table.strategy = kind.write_strategy(table.mode);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_strategy() {
        assert_eq!(
            TaskKind::Migration.write_strategy(WriteMode::Append),
            WriteStrategy::Append
        );
        assert_eq!(
            TaskKind::Integration.write_strategy(WriteMode::Update),
            WriteStrategy::Upsert
        );
        assert_eq!(
            TaskKind::Masking.write_strategy(WriteMode::Append),
            WriteStrategy::Mask
        );
    }

    #[test]
    fn test_source_resolution() {
        let sources = vec![Database::new("a"), Database::new("b")];
        let dest = Database::new("c");

        let single = SourceStrategy::Single.sources(&sources, &dest);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].dialect, "a");

        assert_eq!(SourceStrategy::Many.sources(&sources, &dest).len(), 2);
        assert_eq!(SourceStrategy::SameAsDest.sources(&sources, &dest)[0].dialect, "c");
        assert!(SourceStrategy::Many.skips_failed_sources());
        assert!(!SourceStrategy::Single.skips_failed_sources());
    }

    #[test]
    fn test_masking_is_not_leveled() {
        assert!(!TaskKind::Masking.is_leveled());
        assert!(TaskKind::Migration.is_leveled());
    }
}
