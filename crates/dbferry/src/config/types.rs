//! Configuration type definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::{Database, Table, WriteMode};
use crate::orchestrator::{RunMode, TaskKind};

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,

    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_bytes: sys.total_memory(),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            self.cpu_cores
        );
    }

    /// Default worker count: two cores left free, between 2 and 32.
    pub fn default_threads(&self) -> usize {
        self.cpu_cores.saturating_sub(2).clamp(2, 32)
    }
}

/// Root profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Run mode.
    #[serde(default)]
    pub mode: RunMode,

    /// Worker count. Auto-tuned from CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,

    /// Local time of day (`HH:MM`) for daily runs.
    #[serde(default, alias = "dailyAt", skip_serializing_if = "Option::is_none")]
    pub daily_at: Option<String>,

    /// Pause between continuous runs, in seconds.
    #[serde(default = "default_interval_secs", alias = "intervalSecs")]
    pub interval_secs: u64,

    /// Page windows per query.
    #[serde(default = "default_read_pages", alias = "readPages")]
    pub read_pages: usize,

    /// Wrap each table in a transaction.
    #[serde(default = "default_true", alias = "withTransaction")]
    pub with_transaction: bool,

    /// Instances run in parallel.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_read_pages() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// One instance: tasks run in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,

    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    #[serde(default)]
    pub kind: TaskKind,

    /// Source stores; masking tasks use `dest` and may leave this empty.
    #[serde(default)]
    pub sources: Vec<Database>,

    pub dest: Database,

    /// Table file path (relative to the profile) or an inline table list.
    pub tables: TableSource,

    /// Table pool size for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

/// Where a task's tables are defined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSource {
    /// Path to a YAML or JSON table file.
    File(PathBuf),
    /// Tables listed in the profile.
    Inline(Vec<TableConfig>),
}

/// Table file contents: a bare list or a `tables:` mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableFile {
    List(Vec<TableConfig>),
    Wrapped { tables: Vec<TableConfig> },
}

impl TableFile {
    pub fn into_tables(self) -> Vec<TableConfig> {
        match self {
            TableFile::List(tables) | TableFile::Wrapped { tables } => tables,
        }
    }
}

/// One table file entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    #[serde(default, alias = "destName", skip_serializing_if = "Option::is_none")]
    pub dest_name: Option<String>,

    /// Level; 0 computes it from references.
    #[serde(default)]
    pub order: i32,

    #[serde(rename = "orderSQL", alias = "order_sql", alias = "orderSql", default)]
    pub order_sql: String,

    #[serde(
        rename = "whereSQL",
        alias = "where_sql",
        alias = "whereSql",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub where_sql: Option<String>,

    #[serde(rename = "pageSize", alias = "page_size", default = "default_page_size")]
    pub page_size: usize,

    #[serde(default)]
    pub mode: WriteMode,

    #[serde(rename = "keyFields", alias = "key_fields", default)]
    pub key_fields: Vec<String>,

    #[serde(rename = "skipFields", alias = "skip_fields", default)]
    pub skip_fields: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default)]
    pub references: Vec<String>,
}

fn default_page_size() -> usize {
    1000
}

impl TableConfig {
    /// Build the engine table.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.name.clone(), self.order_sql.trim())
            .with_page_size(self.page_size)
            .with_mode(self.mode)
            .with_keys(self.key_fields.iter().cloned())
            .with_references(self.references.iter().cloned());
        if let Some(dest) = self.dest_name.as_deref().filter(|d| !d.trim().is_empty()) {
            table.dest_name = dest.trim().to_string();
        }
        table.order = self.order;
        table.where_sql = self.where_sql.clone().filter(|w| !w.trim().is_empty());
        table.skip_fields = self.skip_fields.clone();
        table.filter = self.filter.clone().filter(|f| !f.trim().is_empty());
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_config_camel_case() {
        let yaml = r#"
name: orders
destName: orders_copy
orderSQL: id
whereSQL: "id > 10"
pageSize: 250
mode: Update
keyFields: [id]
skipFields: [blob]
filter: trim
references: [customers]
"#;
        let cfg: TableConfig = serde_yaml::from_str(yaml).unwrap();
        let table = cfg.to_table();
        assert_eq!(table.dest_name, "orders_copy");
        assert_eq!(table.page_size, 250);
        assert_eq!(table.mode, WriteMode::Update);
        assert_eq!(table.key_fields, vec!["id"]);
        assert_eq!(table.where_sql.as_deref(), Some("id > 10"));
        assert_eq!(table.filter.as_deref(), Some("trim"));
    }

    #[test]
    fn test_table_config_snake_case() {
        let json = r#"{"name":"orders","order_sql":"id","page_size":10,"key_fields":["id"]}"#;
        let cfg: TableConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.order_sql, "id");
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.to_table().dest_name, "orders");
    }

    #[test]
    fn test_table_file_shapes() {
        let list: TableFile = serde_yaml::from_str("- name: a\n  orderSQL: id\n").unwrap();
        assert_eq!(list.into_tables().len(), 1);
        let wrapped: TableFile =
            serde_yaml::from_str("tables:\n  - name: a\n    orderSQL: id\n").unwrap();
        assert_eq!(wrapped.into_tables().len(), 1);
    }

    #[test]
    fn test_default_threads_bounds() {
        let small = SystemResources {
            total_memory_bytes: 0,
            cpu_cores: 1,
        };
        assert_eq!(small.default_threads(), 2);
        let big = SystemResources {
            total_memory_bytes: 0,
            cpu_cores: 128,
        };
        assert_eq!(big.default_threads(), 32);
    }
}
