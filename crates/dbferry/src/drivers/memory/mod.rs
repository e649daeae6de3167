//! In-process transactional table store.
//!
//! Backs tests and dry runs. Supports watermark pagination, key and
//! reference metadata, staged writes under a transaction and fault
//! injection. `whereSQL` accepts a single `field <op> literal` comparison.

mod predicate;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::core::{
    next_batch, Assistant, Batch, Database, PluginRegistry, QueryParams, Reader, Row, RowCursor,
    RowFilter, Script, ScriptBody, ScriptBuilder, Table, TableInfo, Value, WriteStrategy, Writer,
};
use crate::error::{FerryError, Result};

use predicate::Predicate;

/// One stored table.
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub name: String,
    pub fields: Vec<String>,
    pub key_fields: Vec<String>,
    pub references: Vec<String>,
    pub rows: Vec<Row>,
}

impl MemTable {
    fn position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.eq_ignore_ascii_case(field))
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    tables: BTreeMap<String, MemTable>,
    execs: usize,
    fail_exec_on: Option<usize>,
    queries: usize,
    fail_query_on: Option<usize>,
    unreachable: bool,
}

impl StoreInner {
    fn table(&self, name: &str) -> Option<&MemTable> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    fn table_mut(&mut self, name: &str) -> Option<&mut MemTable> {
        self.tables.get_mut(&name.to_ascii_lowercase())
    }
}

/// Shared handle to an in-process store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create (or replace) an empty table.
    pub fn create_table(&self, name: &str, fields: &[&str], keys: &[&str], references: &[&str]) {
        let table = MemTable {
            name: name.to_string(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            key_fields: keys.iter().map(|s| s.to_string()).collect(),
            references: references.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        };
        self.lock().tables.insert(name.to_ascii_lowercase(), table);
    }

    /// Append rows, aligned with the table's fields. Short rows are padded
    /// with NULL and long rows truncated to the table's width. Unknown
    /// tables are ignored.
    pub fn insert_rows(&self, name: &str, rows: impl IntoIterator<Item = Row>) {
        if let Some(t) = self.lock().table_mut(name) {
            let width = t.fields.len();
            t.rows.extend(rows.into_iter().map(|mut row| {
                row.resize(width, Value::Null);
                row
            }));
        }
    }

    /// Committed rows of a table.
    pub fn rows(&self, name: &str) -> Vec<Row> {
        self.lock().table(name).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Committed row count of a table.
    pub fn row_count(&self, name: &str) -> usize {
        self.lock().table(name).map_or(0, |t| t.rows.len())
    }

    /// Copy of a table.
    pub fn table(&self, name: &str) -> Option<MemTable> {
        self.lock().table(name).cloned()
    }

    /// Make the `n`th script execution from now (1-based) fail.
    pub fn fail_exec_on(&self, n: usize) {
        let mut inner = self.lock();
        inner.execs = 0;
        inner.fail_exec_on = Some(n);
    }

    /// Make the `n`th page query from now (1-based) fail.
    pub fn fail_query_on(&self, n: usize) {
        let mut inner = self.lock();
        inner.queries = 0;
        inner.fail_query_on = Some(n);
    }

    /// Refuse new connections.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Scripts executed so far (including failed ones).
    pub fn exec_count(&self) -> usize {
        self.lock().execs
    }

    fn connect(&self, db: &Database) -> Result<()> {
        if self.lock().unreachable {
            return Err(FerryError::connect(db.server(), "store is unreachable"));
        }
        Ok(())
    }
}

/// Register the memory dialect under `name`.
pub fn register(registry: &mut PluginRegistry, name: &str, store: MemoryStore) {
    let s = store.clone();
    registry.register_assistant(name, move |db: Database| {
        let store = s.clone();
        async move {
            store.connect(&db)?;
            Ok(Box::new(MemoryAssistant { store }) as Box<dyn Assistant>)
        }
    });

    let s = store.clone();
    registry.register_reader(name, move |db: Database| {
        let store = s.clone();
        async move {
            store.connect(&db)?;
            Ok(Box::new(MemoryReader { store }) as Box<dyn Reader>)
        }
    });

    registry.register_writer(name, move |db: Database| {
        let store = store.clone();
        async move {
            store.connect(&db)?;
            Ok(Box::new(MemoryWriter::new(store)) as Box<dyn Writer>)
        }
    });
}

/// Schema discovery over a memory store.
pub struct MemoryAssistant {
    store: MemoryStore,
}

#[async_trait]
impl Assistant for MemoryAssistant {
    async fn get_tables(&mut self) -> Result<Vec<TableInfo>> {
        let inner = self.store.lock();
        Ok(inner
            .tables
            .values()
            .map(|t| TableInfo {
                name: t.name.clone(),
                schema: String::new(),
                key_fields: t.key_fields.clone(),
                references: t.references.clone(),
                order: 0,
            })
            .collect())
    }

    async fn get_fields(&mut self, table: &str) -> Result<Vec<String>> {
        self.store
            .lock()
            .table(table)
            .map(|t| t.fields.clone())
            .ok_or_else(|| FerryError::discovery(table, "table not found"))
    }
}

/// Paginated reads over a memory store.
pub struct MemoryReader {
    store: MemoryStore,
}

impl MemoryReader {
    fn selected(t: &MemTable, table: &Table) -> Result<Vec<Row>> {
        let predicate = match table.where_sql.as_deref().map(str::trim) {
            Some(sql) if !sql.is_empty() => Some(
                Predicate::parse(sql, &t.fields).map_err(|e| FerryError::read(&table.name, e))?,
            ),
            _ => None,
        };
        Ok(t.rows
            .iter()
            .filter(|r| predicate.as_ref().map_or(true, |p| p.matches(r)))
            .cloned()
            .collect())
    }
}

/// Parse an `orderSQL` list into (field index, descending) pairs.
fn sort_spec(t: &MemTable, table: &Table) -> Result<Vec<(usize, bool)>> {
    let mut spec = Vec::new();
    for term in table.order_sql.split(',') {
        let mut parts = term.split_whitespace();
        let Some(field) = parts.next() else {
            continue;
        };
        let desc = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("desc"));
        let idx = t.position(field).ok_or_else(|| {
            FerryError::read(&table.name, format!("unknown order field '{}'", field))
        })?;
        spec.push((idx, desc));
    }
    Ok(spec)
}

fn compare_rows(a: &Row, b: &Row, spec: &[(usize, bool)]) -> Ordering {
    for &(idx, desc) in spec {
        let ord = match (a.get(idx), b.get(idx)) {
            (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        let ord = if desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl Reader for MemoryReader {
    fn supports_watermark(&self) -> bool {
        true
    }

    async fn query_count(&mut self, table: &Table, _params: &QueryParams) -> Result<u64> {
        let inner = self.store.lock();
        let t = inner
            .table(&table.name)
            .ok_or_else(|| FerryError::read(&table.name, "table not found"))?;
        Ok(Self::selected(t, table)?.len() as u64)
    }

    async fn query_page(
        &mut self,
        table: &Table,
        from_row: u64,
        to_row: u64,
        params: &QueryParams,
    ) -> Result<RowCursor> {
        let mut inner = self.store.lock();
        inner.queries += 1;
        if inner.fail_query_on == Some(inner.queries) {
            return Err(FerryError::read(&table.name, "injected query failure"));
        }

        let t = inner
            .table(&table.name)
            .ok_or_else(|| FerryError::read(&table.name, "table not found"))?;
        let mut rows = Self::selected(t, table)?;
        let count = (to_row + 1).saturating_sub(from_row.max(1)) as usize;

        let page: Vec<Row> = match params.keyset_bound() {
            Some((key, after)) => {
                let idx = t.position(key).ok_or_else(|| {
                    FerryError::read(&table.name, format!("unknown key field '{}'", key))
                })?;
                if let Some(mark) = after {
                    rows.retain(|r| {
                        r.get(idx).and_then(|v| v.partial_cmp(mark)) == Some(Ordering::Greater)
                    });
                }
                rows.sort_by(|a, b| compare_rows(a, b, &[(idx, false)]));
                rows.into_iter().take(count).collect()
            }
            _ => {
                let spec = sort_spec(t, table)?;
                rows.sort_by(|a, b| compare_rows(a, b, &spec));
                rows.into_iter()
                    .skip(from_row.saturating_sub(1) as usize)
                    .take(count)
                    .collect()
            }
        };

        Ok(RowCursor::new(t.fields.clone(), page))
    }
}

/// Builds direct row scripts.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryScriptBuilder;

impl ScriptBuilder for MemoryScriptBuilder {
    fn build_script(
        &self,
        table: &Table,
        cursor: &mut RowCursor,
        filter: Option<&dyn RowFilter>,
    ) -> Result<Option<Script>> {
        Ok(next_batch(table, cursor, filter)?.map(|(rows, batch)| Script {
            rows,
            body: ScriptBody::Rows(batch),
        }))
    }
}

#[derive(Debug)]
struct StagedWrite {
    table: String,
    strategy: WriteStrategy,
    keys: Vec<String>,
    batch: Batch,
}

/// Writes to a memory store, staged until commit inside a transaction.
pub struct MemoryWriter {
    store: MemoryStore,
    staged: Option<Vec<StagedWrite>>,
}

impl MemoryWriter {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            staged: None,
        }
    }
}

fn apply(tables: &mut BTreeMap<String, MemTable>, write: &StagedWrite) -> Result<u64> {
    let t = tables
        .get_mut(&write.table.to_ascii_lowercase())
        .ok_or_else(|| FerryError::write(&write.table, "table not found"))?;

    let mut positions = Vec::with_capacity(write.batch.fields.len());
    for field in &write.batch.fields {
        let pos = t.position(field).ok_or_else(|| {
            FerryError::write(&write.table, format!("unknown field '{}'", field))
        })?;
        positions.push(pos);
    }
    let key_positions: Vec<(usize, usize)> = write
        .keys
        .iter()
        .filter_map(|k| {
            let in_batch = write.batch.fields.iter().position(|f| f.eq_ignore_ascii_case(k))?;
            Some((in_batch, t.position(k)?))
        })
        .collect();
    if write.strategy != WriteStrategy::Append && key_positions.len() != write.keys.len() {
        return Err(FerryError::write(&write.table, "key fields missing from script"));
    }

    let width = t.fields.len();
    for row in &write.batch.rows {
        let existing = if write.strategy == WriteStrategy::Append {
            None
        } else {
            t.rows.iter().position(|stored| {
                key_positions
                    .iter()
                    .all(|&(b, s)| stored.get(s).is_some_and(|v| row.get(b) == Some(v)))
            })
        };

        match (write.strategy, existing) {
            (_, Some(i)) => {
                let Some(stored) = t.rows.get_mut(i) else {
                    continue;
                };
                for (value, &pos) in row.iter().zip(&positions) {
                    if let Some(slot) = stored.get_mut(pos) {
                        *slot = value.clone();
                    }
                }
            }
            (WriteStrategy::Mask, None) => {}
            (_, None) => {
                let mut stored = vec![Value::Null; width];
                for (value, &pos) in row.iter().zip(&positions) {
                    if let Some(slot) = stored.get_mut(pos) {
                        *slot = value.clone();
                    }
                }
                t.rows.push(stored);
            }
        }
    }
    Ok(write.batch.rows.len() as u64)
}

#[async_trait]
impl Writer for MemoryWriter {
    fn script_builder(&self) -> Arc<dyn ScriptBuilder> {
        Arc::new(MemoryScriptBuilder)
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.staged = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        let mut inner = self.store.lock();
        let mut tables = inner.tables.clone();
        for write in &staged {
            apply(&mut tables, write)?;
        }
        inner.tables = tables;
        debug!("memory: committed {} scripts", staged.len());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(staged) = self.staged.take() {
            debug!("memory: discarded {} scripts", staged.len());
        }
        Ok(())
    }

    async fn exec_script(&mut self, table: &Table, script: Script) -> Result<u64> {
        let ScriptBody::Rows(batch) = script.body else {
            return Err(FerryError::write(&table.dest_name, "memory store cannot run SQL scripts"));
        };
        let write = StagedWrite {
            table: table.dest_name.clone(),
            strategy: table.strategy,
            keys: table.key_fields.clone(),
            batch,
        };

        let mut inner = self.store.lock();
        inner.execs += 1;
        if inner.fail_exec_on == Some(inner.execs) {
            return Err(FerryError::write(&table.dest_name, "injected write failure"));
        }

        match self.staged.as_mut() {
            Some(staged) => {
                if inner.table(&write.table).is_none() {
                    return Err(FerryError::write(&write.table, "table not found"));
                }
                let rows = write.batch.rows.len() as u64;
                staged.push(write);
                Ok(rows)
            }
            None => apply(&mut inner.tables, &write),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("people", &["id", "name"], &["id"], &[]);
        store.insert_rows(
            "people",
            [3, 1, 2, 5, 4].map(|i| vec![Value::I64(i), Value::from(format!("p{}", i))]),
        );
        store
    }

    #[tokio::test]
    async fn test_offset_pages_follow_order_sql() {
        let mut reader = MemoryReader { store: store() };
        let table = Table::new("people", "id desc");
        let mut page = reader
            .query_page(&table, 2, 3, &QueryParams::default())
            .await
            .unwrap();
        assert_eq!(page.next_row().unwrap()[0], Value::I64(4));
        assert_eq!(page.next_row().unwrap()[0], Value::I64(3));
        assert!(page.next_row().is_none());
    }

    #[tokio::test]
    async fn test_watermark_pages() {
        let mut reader = MemoryReader { store: store() };
        let table = Table::new("people", "id").with_keys(["id"]);
        let params = QueryParams {
            watermark: Some(Value::I64(3)),
            ..QueryParams::keyset("id")
        };
        let page = reader.query_page(&table, 1, 10, &params).await.unwrap();
        assert_eq!(page.remaining(), 2);
    }

    #[tokio::test]
    async fn test_where_sql_filters_count() {
        let mut reader = MemoryReader { store: store() };
        let mut table = Table::new("people", "id");
        table.where_sql = Some("id >= 3".into());
        assert_eq!(
            reader.query_count(&table, &QueryParams::default()).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_transaction_stages_until_commit() {
        let store = store();
        store.create_table("copy", &["id", "name"], &["id"], &[]);
        let mut writer = MemoryWriter::new(store.clone());
        let mut table = Table::new("people", "id");
        table.dest_name = "copy".into();

        writer.begin_transaction().await.unwrap();
        let script = Script {
            rows: 1,
            body: ScriptBody::Rows(Batch {
                fields: vec!["id".into(), "name".into()],
                rows: vec![vec![Value::I64(9), Value::from("x")]],
            }),
        };
        assert_eq!(writer.exec_script(&table, script.clone()).await.unwrap(), 1);
        assert_eq!(store.row_count("copy"), 0);
        writer.commit().await.unwrap();
        assert_eq!(store.row_count("copy"), 1);

        writer.begin_transaction().await.unwrap();
        writer.exec_script(&table, script).await.unwrap();
        writer.rollback().await.unwrap();
        assert_eq!(store.row_count("copy"), 1);
    }

    #[tokio::test]
    async fn test_short_rows_are_padded() {
        let store = store();
        store.insert_rows("people", [vec![Value::I64(6)]]);
        let rows = store.rows("people");
        assert_eq!(rows.last().unwrap(), &vec![Value::I64(6), Value::Null]);

        let mut reader = MemoryReader { store };
        let table = Table::new("people", "name desc");
        let page = reader
            .query_page(&table, 1, 10, &QueryParams::default())
            .await
            .unwrap();
        assert_eq!(page.remaining(), 6);
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() {
        let store = store();
        store.create_table("copy", &["id", "name"], &["id"], &[]);
        let mut writer = MemoryWriter::new(store.clone());
        let mut table = Table::new("people", "id");
        table.dest_name = "copy".into();

        writer.begin_transaction().await.unwrap();
        let good = Script {
            rows: 1,
            body: ScriptBody::Rows(Batch {
                fields: vec!["id".into(), "name".into()],
                rows: vec![vec![Value::I64(1), Value::from("a")]],
            }),
        };
        let bad = Script {
            rows: 1,
            body: ScriptBody::Rows(Batch {
                fields: vec!["id".into(), "nickname".into()],
                rows: vec![vec![Value::I64(2), Value::from("b")]],
            }),
        };
        writer.exec_script(&table, good).await.unwrap();
        writer.exec_script(&table, bad).await.unwrap();

        assert!(writer.commit().await.is_err());
        assert_eq!(store.row_count("copy"), 0);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_keys() {
        let store = store();
        let mut writer = MemoryWriter::new(store.clone());
        let mut table = Table::new("people", "id")
            .with_keys(["id"])
            .with_mode(crate::core::WriteMode::Update);
        table.strategy = WriteStrategy::Upsert;

        let script = Script {
            rows: 2,
            body: ScriptBody::Rows(Batch {
                fields: vec!["id".into(), "name".into()],
                rows: vec![
                    vec![Value::I64(1), Value::from("renamed")],
                    vec![Value::I64(6), Value::from("p6")],
                ],
            }),
        };
        writer.exec_script(&table, script).await.unwrap();

        let rows = store.rows("people");
        assert_eq!(rows.len(), 6);
        let one = rows.iter().find(|r| r[0] == Value::I64(1)).unwrap();
        assert_eq!(one[1], Value::from("renamed"));
    }

    #[tokio::test]
    async fn test_injected_exec_failure() {
        let store = store();
        store.fail_exec_on(1);
        let mut writer = MemoryWriter::new(store.clone());
        let table = Table::new("people", "id");
        let script = Script {
            rows: 0,
            body: ScriptBody::Rows(Batch {
                fields: vec!["id".into()],
                rows: vec![],
            }),
        };
        assert!(writer.exec_script(&table, script).await.is_err());
        assert_eq!(store.exec_count(), 1);
    }
}
