//! SQL dialect strategy shared by the relational plugins.
//!
//! A [`SqlDialect`] renders identifiers, literals, page queries and the
//! three write shapes (append, upsert, mask). [`SqlScriptBuilder`] turns a
//! page of rows into self-contained statements so a script can be logged
//! or replayed without bound parameters.

use std::sync::Arc;

use crate::core::{
    next_batch, Batch, RowFilter, Script, ScriptBody, ScriptBuilder, Table, Value, WriteStrategy,
};
use crate::error::{FerryError, Result};

/// SQL syntax differences between relational stores.
pub trait SqlDialect: Send + Sync + 'static {
    /// Dialect name for logs.
    fn name(&self) -> &str;

    /// Quote one identifier part.
    fn quote_ident(&self, name: &str) -> String;

    /// Quote a possibly schema-qualified name, prefixing `default_schema`
    /// when the name has none.
    fn qualify(&self, default_schema: &str, name: &str) -> String {
        match name.rsplit_once('.') {
            Some((schema, table)) => {
                format!("{}.{}", self.quote_ident(schema.trim()), self.quote_ident(table.trim()))
            }
            None if default_schema.is_empty() => self.quote_ident(name),
            None => format!("{}.{}", self.quote_ident(default_schema), self.quote_ident(name)),
        }
    }

    /// Render a value as a SQL literal.
    fn literal(&self, value: &Value) -> String {
        ansi_literal(value)
    }

    /// Query for rows `from_row..=to_row` (1-based) in `order_sql` order,
    /// or, with a keyset, for the next `to_row - from_row + 1` rows by key
    /// after the optional lower bound.
    fn page_query(
        &self,
        table: &Table,
        qualified: &str,
        from_row: u64,
        to_row: u64,
        keyset: Option<(&str, Option<&Value>)>,
    ) -> String;

    /// Row count query honouring `whereSQL`.
    fn count_query(&self, table: &Table, qualified: &str) -> String {
        let mut sql = format!("SELECT COUNT(*) FROM {}", qualified);
        if let Some(w) = where_clause(table) {
            sql.push_str(&format!(" WHERE ({})", w));
        }
        sql
    }

    /// Largest number of rows one `VALUES` list may carry.
    fn max_values_rows(&self) -> usize {
        usize::MAX
    }

    /// Batch insert.
    fn insert_statement(&self, qualified: &str, batch: &Batch) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            qualified,
            self.column_list(&batch.fields),
            self.values_list(batch)
        )
    }

    /// Insert-or-update by key.
    fn upsert_statement(&self, qualified: &str, table: &Table, batch: &Batch) -> String;

    /// One `UPDATE` per row, setting non-key fields by key.
    fn mask_statements(&self, qualified: &str, table: &Table, batch: &Batch) -> Vec<String> {
        let mut out = Vec::with_capacity(batch.rows.len());
        for row in &batch.rows {
            let mut sets = Vec::new();
            let mut conds = Vec::new();
            for (field, value) in batch.fields.iter().zip(row) {
                let col = self.quote_ident(field);
                if table.is_key(field) {
                    match value {
                        Value::Null => conds.push(format!("{} IS NULL", col)),
                        v => conds.push(format!("{} = {}", col, self.literal(v))),
                    }
                } else {
                    sets.push(format!("{} = {}", col, self.literal(value)));
                }
            }
            if sets.is_empty() || conds.is_empty() {
                continue;
            }
            out.push(format!(
                "UPDATE {} SET {} WHERE {}",
                qualified,
                sets.join(", "),
                conds.join(" AND ")
            ));
        }
        out
    }

    /// Comma-separated quoted column names.
    fn column_list(&self, fields: &[String]) -> String {
        fields
            .iter()
            .map(|f| self.quote_ident(f))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `(..), (..)` rows of literals.
    fn values_list(&self, batch: &Batch) -> String {
        batch
            .rows
            .iter()
            .map(|row| {
                let values: Vec<String> = row.iter().map(|v| self.literal(v)).collect();
                format!("({})", values.join(", "))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Select list for a page query.
    fn select_list(&self, table: &Table) -> String {
        if table.source_fields.is_empty() {
            "*".to_string()
        } else {
            self.column_list(&table.source_fields)
        }
    }
}

/// Non-empty `whereSQL`.
pub fn where_clause(table: &Table) -> Option<&str> {
    table
        .where_sql
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty())
}

/// Standard SQL literal; PostgreSQL `bytea` hex syntax for bytes.
pub fn ansi_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F64(v) if v.is_finite() => v.to_string(),
        Value::F64(_) => "NULL".to_string(),
        Value::Decimal(v) => v.to_string(),
        Value::Text(s) => quote_text(s),
        Value::Bytes(b) => format!("'\\x{}'", hex(b)),
        Value::Uuid(v) => format!("'{}'", v),
        Value::DateTime(_) | Value::Date(_) => format!("'{}'", value),
    }
}

/// Single-quoted text with embedded quotes doubled.
pub fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Lowercase hex encoding.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Builds SQL scripts for a dialect.
#[derive(Clone)]
pub struct SqlScriptBuilder {
    dialect: Arc<dyn SqlDialect>,
    default_schema: String,
}

impl SqlScriptBuilder {
    pub fn new(dialect: Arc<dyn SqlDialect>, default_schema: impl Into<String>) -> Self {
        Self {
            dialect,
            default_schema: default_schema.into(),
        }
    }

    fn statements(&self, table: &Table, batch: &Batch) -> Result<Vec<String>> {
        if batch.rows.is_empty() {
            return Ok(Vec::new());
        }
        let qualified = self.dialect.qualify(&self.default_schema, &table.dest_name);

        if table.strategy != WriteStrategy::Append && table.key_fields.is_empty() {
            return Err(FerryError::write(
                &table.dest_name,
                format!("{:?} scripts require key fields", table.strategy),
            ));
        }
        if table.strategy == WriteStrategy::Mask {
            return Ok(self.dialect.mask_statements(&qualified, table, batch));
        }

        let chunk_rows = self.dialect.max_values_rows().max(1);
        let mut out = Vec::new();
        for rows in batch.rows.chunks(chunk_rows) {
            let chunk = Batch {
                fields: batch.fields.clone(),
                rows: rows.to_vec(),
            };
            out.push(match table.strategy {
                WriteStrategy::Upsert => self.dialect.upsert_statement(&qualified, table, &chunk),
                _ => self.dialect.insert_statement(&qualified, &chunk),
            });
        }
        Ok(out)
    }
}

impl ScriptBuilder for SqlScriptBuilder {
    fn build_script(
        &self,
        table: &Table,
        cursor: &mut crate::core::RowCursor,
        filter: Option<&dyn RowFilter>,
    ) -> Result<Option<Script>> {
        let Some((rows, batch)) = next_batch(table, cursor, filter)? else {
            return Ok(None);
        };
        Ok(Some(Script {
            rows,
            body: ScriptBody::Sql(self.statements(table, &batch)?),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RowCursor;

    struct TwoRowDialect;

    impl SqlDialect for TwoRowDialect {
        fn name(&self) -> &str {
            "test"
        }

        fn quote_ident(&self, name: &str) -> String {
            format!("\"{}\"", name)
        }

        fn page_query(&self, _: &Table, q: &str, _: u64, _: u64, _: Option<(&str, Option<&Value>)>) -> String {
            format!("SELECT * FROM {}", q)
        }

        fn max_values_rows(&self) -> usize {
            2
        }

        fn upsert_statement(&self, qualified: &str, _table: &Table, batch: &Batch) -> String {
            format!("UPSERT {} {}", qualified, self.values_list(batch))
        }
    }

    fn cursor(n: i64) -> RowCursor {
        let rows = (1..=n)
            .map(|i| vec![Value::I64(i), Value::from(format!("n{}", i))])
            .collect();
        RowCursor::new(vec!["id".into(), "name".into()], rows)
    }

    fn builder() -> SqlScriptBuilder {
        SqlScriptBuilder::new(Arc::new(TwoRowDialect), "s")
    }

    #[test]
    fn test_insert_chunks_by_values_limit() {
        let table = Table::new("t", "id").with_page_size(5);
        let script = builder()
            .build_script(&table, &mut cursor(5), None)
            .unwrap()
            .unwrap();
        assert_eq!(script.rows, 5);
        let ScriptBody::Sql(statements) = script.body else {
            panic!("expected SQL");
        };
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[0],
            "INSERT INTO \"s\".\"t\" (\"id\", \"name\") VALUES (1, 'n1'), (2, 'n2')"
        );
    }

    #[test]
    fn test_mask_requires_keys() {
        let mut table = Table::new("t", "id");
        table.strategy = WriteStrategy::Mask;
        assert!(builder().build_script(&table, &mut cursor(1), None).is_err());

        table.key_fields = vec!["id".into()];
        let script = builder()
            .build_script(&table, &mut cursor(2), None)
            .unwrap()
            .unwrap();
        assert_eq!(script.len(), 2);
    }

    #[test]
    fn test_exhausted_cursor_builds_nothing() {
        let table = Table::new("t", "id");
        let mut c = cursor(0);
        assert!(builder().build_script(&table, &mut c, None).unwrap().is_none());
    }

    #[test]
    fn test_ansi_literals() {
        assert_eq!(ansi_literal(&Value::from("a'b")), "'a''b'");
        assert_eq!(ansi_literal(&Value::Bytes(vec![1, 255])), "'\\x01ff'");
        assert_eq!(ansi_literal(&Value::F64(f64::NAN)), "NULL");
        assert_eq!(ansi_literal(&Value::Bool(false)), "FALSE");
    }
}
