//! Capability contracts a storage plugin implements.
//!
//! - [`Assistant`]: schema discovery (tables, fields, keys, references)
//! - [`Reader`]: counted, paginated extraction
//! - [`Writer`]: transactional execution of scripts
//! - [`ScriptBuilder`]: turns a page of rows into dialect-specific scripts
//! - [`RowFilter`]: per-row transform applied while building scripts
//!
//! Every reader, writer and assistant owns exactly one connection and is
//! used by one worker at a time, so the traits take `&mut self` and only
//! require `Send`.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{FerryError, Result};

use super::schema::{Table, TableInfo};
use super::value::{Row, Value};

/// Arguments that accompany a page request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    /// Single key field for keyset paging.
    ///
    /// When set, the reader must order rows by this key ascending (ignoring
    /// `order_sql`) and treat the requested window as a row count
    /// (`to_row - from_row + 1`) rather than an offset. Applies to every
    /// page, including the first.
    pub keyset: Option<String>,
    /// Highest key value seen so far. Only meaningful with `keyset`: rows
    /// must have a key strictly greater than this value.
    pub watermark: Option<Value>,
}

impl QueryParams {
    /// Keyset paging over `key`, starting from the first row.
    pub fn keyset(key: impl Into<String>) -> Self {
        Self {
            keyset: Some(key.into()),
            watermark: None,
        }
    }

    /// The keyset key and its lower bound, if keyset paging is on.
    pub fn keyset_bound(&self) -> Option<(&str, Option<&Value>)> {
        self.keyset
            .as_deref()
            .map(|key| (key, self.watermark.as_ref()))
    }
}

/// Rows returned by one page request.
///
/// Consumption is tracked so the producer can tell a short read
/// (end of data) from a full window, and can pick up the watermark for
/// the next request.
#[derive(Debug, Clone, Default)]
pub struct RowCursor {
    fields: Vec<String>,
    rows: VecDeque<Row>,
    consumed: usize,
    key_index: Option<usize>,
    max_key: Option<Value>,
}

impl RowCursor {
    /// Create a cursor over rows aligned with `fields`.
    pub fn new(fields: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            fields,
            rows: rows.into(),
            consumed: 0,
            key_index: None,
            max_key: None,
        }
    }

    /// Field names, positionally aligned with each row.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Start tracking the maximum value of `field` as rows are consumed.
    /// Returns false when the cursor has no such field.
    pub fn track_key(&mut self, field: &str) -> bool {
        self.key_index = self
            .fields
            .iter()
            .position(|f| f.eq_ignore_ascii_case(field));
        self.key_index.is_some()
    }

    /// Take the next row.
    pub fn next_row(&mut self) -> Option<Row> {
        let row = self.rows.pop_front()?;
        self.consumed += 1;
        if let Some(idx) = self.key_index {
            if let Some(value) = row.get(idx) {
                let greater = match &self.max_key {
                    None => !value.is_null(),
                    Some(current) => value > current,
                };
                if greater {
                    self.max_key = Some(value.clone());
                }
            }
        }
        Some(row)
    }

    /// Rows taken so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Rows not yet taken.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Whether every row has been taken.
    pub fn is_exhausted(&self) -> bool {
        self.rows.is_empty()
    }

    /// Maximum tracked key value among consumed rows.
    pub fn max_key(&self) -> Option<&Value> {
        self.max_key.as_ref()
    }
}

/// A page slice projected onto the destination field list.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Destination field names.
    pub fields: Vec<String>,
    /// Projected, filtered rows.
    pub rows: Vec<Row>,
}

/// Opaque unit of write work, built by a [`ScriptBuilder`] and run by the
/// matching [`Writer`].
#[derive(Debug, Clone)]
pub struct Script {
    /// Source rows covered by this script.
    pub rows: usize,
    /// Dialect-specific payload.
    pub body: ScriptBody,
}

/// Payload of a script.
#[derive(Debug, Clone)]
pub enum ScriptBody {
    /// SQL statements executed in order.
    Sql(Vec<String>),
    /// Rows applied directly by stores without a query language.
    Rows(Batch),
}

impl Script {
    /// Number of statements (SQL) or rows (direct) in the payload.
    pub fn len(&self) -> usize {
        match &self.body {
            ScriptBody::Sql(stmts) => stmts.len(),
            ScriptBody::Rows(batch) => batch.rows.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Schema discovery.
#[async_trait]
pub trait Assistant: Send {
    /// Enumerate discoverable tables with their keys and references.
    ///
    /// Stores without this metadata return an empty list, not an error.
    async fn get_tables(&mut self) -> Result<Vec<TableInfo>>;

    /// Field names of a table, in storage order.
    async fn get_fields(&mut self, table: &str) -> Result<Vec<String>>;

    /// Release the connection.
    async fn close(&mut self) {}
}

/// Counted, paginated extraction.
#[async_trait]
pub trait Reader: Send {
    /// Whether this reader honours [`QueryParams::watermark`].
    fn supports_watermark(&self) -> bool {
        false
    }

    /// Count the rows the table's filter selects.
    async fn query_count(&mut self, table: &Table, params: &QueryParams) -> Result<u64>;

    /// Fetch rows `from_row..=to_row` (1-based) in `order_sql` order.
    ///
    /// Fewer rows than requested signals end of data.
    async fn query_page(
        &mut self,
        table: &Table,
        from_row: u64,
        to_row: u64,
        params: &QueryParams,
    ) -> Result<RowCursor>;

    /// Release the connection.
    async fn close(&mut self) {}
}

/// Builds scripts from row cursors. Holds no connection, so it can run on
/// the producer side while the writer's connection stays with the consumer.
pub trait ScriptBuilder: Send + Sync {
    /// Consume up to `table.page_size` rows and build one script.
    ///
    /// Returns `Ok(None)` once the cursor is exhausted; callers loop until
    /// then.
    fn build_script(
        &self,
        table: &Table,
        cursor: &mut RowCursor,
        filter: Option<&dyn RowFilter>,
    ) -> Result<Option<Script>>;
}

/// Transactional script execution.
#[async_trait]
pub trait Writer: Send {
    /// Builder for this writer's script format.
    fn script_builder(&self) -> std::sync::Arc<dyn ScriptBuilder>;

    /// Open a transaction. No-op for stores without transactions.
    async fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Execute one script and return the rows it wrote.
    ///
    /// Failures are fatal to the table: a multi-statement script may be
    /// partially applied, so callers never retry.
    async fn exec_script(&mut self, table: &Table, script: Script) -> Result<u64>;

    /// Release the connection.
    async fn close(&mut self) {}
}

/// Per-row transform.
pub trait RowFilter: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Transform a destination-projected row in place.
    fn apply(&self, table: &Table, fields: &[String], row: &mut Row) -> Result<()>;
}

impl std::fmt::Debug for dyn RowFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RowFilter({})", self.name())
    }
}

/// Take the next page slice from a cursor, projected onto
/// `table.dest_fields` and passed through `filter`.
///
/// Shared by the built-in script builders. When `dest_fields` is empty the
/// cursor's fields minus `skip_fields` are used.
pub fn next_batch(
    table: &Table,
    cursor: &mut RowCursor,
    filter: Option<&dyn RowFilter>,
) -> Result<Option<(usize, Batch)>> {
    if cursor.is_exhausted() {
        return Ok(None);
    }

    let fields: Vec<String> = if table.dest_fields.is_empty() {
        cursor
            .fields()
            .iter()
            .filter(|f| !table.is_skipped(f))
            .cloned()
            .collect()
    } else {
        table.dest_fields.clone()
    };

    let mut positions = Vec::with_capacity(fields.len());
    for field in &fields {
        let pos = cursor
            .fields()
            .iter()
            .position(|f| f.eq_ignore_ascii_case(field))
            .ok_or_else(|| {
                FerryError::read(
                    &table.name,
                    format!("field '{}' missing from source rows", field),
                )
            })?;
        positions.push(pos);
    }

    let page_size = table.page_size.max(1);
    let mut rows = Vec::with_capacity(page_size.min(cursor.remaining()));
    let mut taken = 0;
    while taken < page_size {
        let Some(row) = cursor.next_row() else {
            break;
        };
        taken += 1;
        let mut projected: Row = positions
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        if let Some(filter) = filter {
            filter.apply(table, &fields, &mut projected)?;
        }
        rows.push(projected);
    }

    Ok(Some((taken, Batch { fields, rows })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(n: i64) -> RowCursor {
        let rows = (1..=n)
            .map(|i| vec![Value::I64(i), Value::from(format!("name-{}", i)), Value::Null])
            .collect();
        RowCursor::new(vec!["id".into(), "name".into(), "secret".into()], rows)
    }

    #[test]
    fn test_cursor_tracks_max_key() {
        let mut c = cursor(3);
        assert!(c.track_key("ID"));
        while c.next_row().is_some() {}
        assert_eq!(c.consumed(), 3);
        assert_eq!(c.max_key(), Some(&Value::I64(3)));
    }

    #[test]
    fn test_cursor_without_key_field() {
        let mut c = cursor(1);
        assert!(!c.track_key("missing"));
        c.next_row();
        assert_eq!(c.max_key(), None);
    }

    #[test]
    fn test_next_batch_respects_page_size_and_skip_fields() {
        let mut table = Table::new("people", "id").with_page_size(2);
        table.skip_fields = vec!["secret".into()];
        let mut c = cursor(5);

        let (taken, batch) = next_batch(&table, &mut c, None).unwrap().unwrap();
        assert_eq!(taken, 2);
        assert_eq!(batch.fields, vec!["id", "name"]);
        assert_eq!(batch.rows[1], vec![Value::I64(2), Value::from("name-2")]);

        let (taken, _) = next_batch(&table, &mut c, None).unwrap().unwrap();
        assert_eq!(taken, 2);
        let (taken, _) = next_batch(&table, &mut c, None).unwrap().unwrap();
        assert_eq!(taken, 1);
        assert!(next_batch(&table, &mut c, None).unwrap().is_none());
    }

    #[test]
    fn test_next_batch_missing_dest_field() {
        let mut table = Table::new("people", "id");
        table.dest_fields = vec!["id".into(), "email".into()];
        let mut c = cursor(1);
        assert!(next_batch(&table, &mut c, None).is_err());
    }
}
