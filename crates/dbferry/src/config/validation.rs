//! Configuration validation.

use std::collections::HashSet;

use super::{Profile, TableConfig, TableSource};
use crate::core::WriteMode;
use crate::error::{FerryError, Result};
use crate::orchestrator::{RunMode, TaskKind};

/// Validate a profile whose table files have been loaded.
pub fn validate(profile: &Profile) -> Result<()> {
    if let Some(0) = profile.threads {
        return Err(FerryError::Config("threads must be at least 1".into()));
    }
    if profile.read_pages == 0 {
        return Err(FerryError::Config("read_pages must be at least 1".into()));
    }
    if profile.mode == RunMode::Daily {
        match profile.daily_at.as_deref() {
            None => {
                return Err(FerryError::Config(
                    "daily mode requires daily_at (HH:MM)".into(),
                ))
            }
            Some(at) => {
                super::parse_time(at)?;
            }
        }
    }
    if profile.mode == RunMode::Continuous && profile.interval_secs == 0 {
        return Err(FerryError::Config(
            "continuous mode requires interval_secs of at least 1".into(),
        ));
    }

    let mut instance_names = HashSet::new();
    for instance in &profile.instances {
        if instance.name.trim().is_empty() {
            return Err(FerryError::Config("instance name is required".into()));
        }
        if !instance_names.insert(instance.name.to_lowercase()) {
            return Err(FerryError::Config(format!(
                "duplicate instance name '{}'",
                instance.name
            )));
        }

        for task in &instance.tasks {
            let scope = format!("{}/{}", instance.name, task.name);
            if task.name.trim().is_empty() {
                return Err(FerryError::Config(format!(
                    "{}: task name is required",
                    instance.name
                )));
            }
            if let Some(0) = task.threads {
                return Err(FerryError::Config(format!(
                    "{}: threads must be at least 1",
                    scope
                )));
            }
            if task.kind != TaskKind::Masking && task.sources.is_empty() {
                return Err(FerryError::Config(format!(
                    "{}: at least one source is required",
                    scope
                )));
            }
            if task.dest.dialect.trim().is_empty()
                || task.sources.iter().any(|s| s.dialect.trim().is_empty())
            {
                return Err(FerryError::Config(format!(
                    "{}: every database needs a dialect",
                    scope
                )));
            }

            match &task.tables {
                TableSource::Inline(tables) => validate_tables(&scope, task.kind, tables)?,
                TableSource::File(path) => {
                    return Err(FerryError::Config(format!(
                        "{}: table file {} was not loaded",
                        scope,
                        path.display()
                    )))
                }
            }
        }
    }

    Ok(())
}

/// Validate one task's table entries.
pub fn validate_tables(scope: &str, kind: TaskKind, tables: &[TableConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for table in tables {
        let name = table.name.trim();
        if name.is_empty() {
            return Err(FerryError::Config(format!("{}: table name is required", scope)));
        }
        if !names.insert(name.to_lowercase()) {
            return Err(FerryError::Config(format!(
                "{}: duplicate table '{}'",
                scope, name
            )));
        }
        if table.order_sql.trim().is_empty() {
            return Err(FerryError::Config(format!(
                "{}: table {} has an empty orderSQL",
                scope, name
            )));
        }
        if table.page_size == 0 {
            return Err(FerryError::Config(format!(
                "{}: table {} has pageSize 0",
                scope, name
            )));
        }
        if table.mode == WriteMode::Update && table.key_fields.is_empty() {
            return Err(FerryError::Config(format!(
                "{}: table {} uses Update mode without keyFields",
                scope, name
            )));
        }
        if kind == TaskKind::Masking && table.key_fields.is_empty() {
            return Err(FerryError::Config(format!(
                "{}: masking table {} requires keyFields",
                scope, name
            )));
        }
        if table.order < 0 {
            return Err(FerryError::Config(format!(
                "{}: table {} has a negative order",
                scope, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceConfig, TaskConfig};
    use crate::core::Database;

    fn table(name: &str) -> TableConfig {
        serde_yaml::from_str(&format!("name: {}\norderSQL: id\nkeyFields: [id]\n", name)).unwrap()
    }

    fn profile(kind: TaskKind, tables: Vec<TableConfig>) -> Profile {
        Profile {
            mode: RunMode::Once,
            threads: None,
            daily_at: None,
            interval_secs: 60,
            read_pages: 1,
            with_transaction: true,
            instances: vec![InstanceConfig {
                name: "main".into(),
                tasks: vec![TaskConfig {
                    name: "copy".into(),
                    kind,
                    sources: vec![Database::new("memory")],
                    dest: Database::new("memory"),
                    tables: TableSource::Inline(tables),
                    threads: None,
                }],
            }],
        }
    }

    #[test]
    fn test_valid_profile() {
        assert!(validate(&profile(TaskKind::Migration, vec![table("a"), table("b")])).is_ok());
    }

    #[test]
    fn test_rejects_empty_order_sql() {
        let mut t = table("a");
        t.order_sql = "  ".into();
        let err = validate(&profile(TaskKind::Migration, vec![t])).unwrap_err();
        assert!(err.to_string().contains("orderSQL"));
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let mut t = table("a");
        t.page_size = 0;
        assert!(validate(&profile(TaskKind::Migration, vec![t])).is_err());
    }

    #[test]
    fn test_rejects_update_without_keys() {
        let mut t = table("a");
        t.mode = WriteMode::Update;
        t.key_fields.clear();
        let err = validate(&profile(TaskKind::Migration, vec![t])).unwrap_err();
        assert!(err.to_string().contains("Update mode without keyFields"));
    }

    #[test]
    fn test_rejects_masking_without_keys() {
        let mut t = table("a");
        t.key_fields.clear();
        assert!(validate(&profile(TaskKind::Migration, vec![t.clone()])).is_ok());
        assert!(validate(&profile(TaskKind::Masking, vec![t])).is_err());
    }

    #[test]
    fn test_rejects_duplicate_tables() {
        let err =
            validate(&profile(TaskKind::Migration, vec![table("a"), table("A")])).unwrap_err();
        assert!(err.to_string().contains("duplicate table"));
    }

    #[test]
    fn test_rejects_missing_source() {
        let mut p = profile(TaskKind::Migration, vec![table("a")]);
        p.instances[0].tasks[0].sources.clear();
        assert!(validate(&p).is_err());

        p.instances[0].tasks[0].kind = TaskKind::Masking;
        assert!(validate(&p).is_ok());
    }

    #[test]
    fn test_rejects_zero_threads_and_pages() {
        let mut p = profile(TaskKind::Migration, vec![table("a")]);
        p.threads = Some(0);
        assert!(validate(&p).is_err());

        let mut p = profile(TaskKind::Migration, vec![table("a")]);
        p.read_pages = 0;
        assert!(validate(&p).is_err());
    }

    #[test]
    fn test_daily_requires_time() {
        let mut p = profile(TaskKind::Migration, vec![table("a")]);
        p.mode = RunMode::Daily;
        assert!(validate(&p).is_err());
        p.daily_at = Some("25:00".into());
        assert!(validate(&p).is_err());
        p.daily_at = Some("02:30".into());
        assert!(validate(&p).is_ok());
    }
}
