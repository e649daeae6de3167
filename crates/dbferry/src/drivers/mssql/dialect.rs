//! SQL Server dialect.

use crate::core::{Batch, Table, Value};
use crate::drivers::sql::{ansi_literal, hex, where_clause, SqlDialect};

/// Rows one table value constructor may carry.
const MAX_VALUES_ROWS: usize = 1000;

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl SqlDialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Value::Text(s) => format!("N'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => format!("0x{}", hex(b)),
            Value::DateTime(v) => format!("'{}'", v.format("%Y-%m-%dT%H:%M:%S%.f")),
            other => ansi_literal(other),
        }
    }

    fn count_query(&self, table: &Table, qualified: &str) -> String {
        let mut sql = format!("SELECT COUNT_BIG(*) FROM {}", qualified);
        if let Some(w) = where_clause(table) {
            sql.push_str(&format!(" WHERE ({})", w));
        }
        sql
    }

    fn page_query(
        &self,
        table: &Table,
        qualified: &str,
        from_row: u64,
        to_row: u64,
        keyset: Option<(&str, Option<&Value>)>,
    ) -> String {
        let count = (to_row + 1).saturating_sub(from_row.max(1));
        let select = self.select_list(table);
        let filter = where_clause(table).map(|w| format!("({})", w));

        match keyset {
            Some((key, after)) => {
                let mut conditions: Vec<String> = after
                    .map(|mark| format!("{} > {}", self.quote_ident(key), self.literal(mark)))
                    .into_iter()
                    .collect();
                conditions.extend(filter);
                let mut sql = format!("SELECT TOP {} {} FROM {}", count, select, qualified);
                if !conditions.is_empty() {
                    sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
                }
                sql.push_str(&format!(" ORDER BY {}", self.quote_ident(key)));
                sql
            }
            None => {
                let mut sql = format!("SELECT {} FROM {}", select, qualified);
                if let Some(f) = filter {
                    sql.push_str(&format!(" WHERE {}", f));
                }
                sql.push_str(&format!(
                    " ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                    table.order_sql,
                    from_row.saturating_sub(1),
                    count
                ));
                sql
            }
        }
    }

    fn max_values_rows(&self) -> usize {
        MAX_VALUES_ROWS
    }

    fn upsert_statement(&self, qualified: &str, table: &Table, batch: &Batch) -> String {
        let cols = self.column_list(&batch.fields);
        let on = table
            .key_fields
            .iter()
            .map(|k| {
                let col = self.quote_ident(k);
                format!("t.{} = s.{}", col, col)
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let updates: Vec<String> = batch
            .fields
            .iter()
            .filter(|f| !table.is_key(f))
            .map(|f| {
                let col = self.quote_ident(f);
                format!("t.{} = s.{}", col, col)
            })
            .collect();
        let source_cols = batch
            .fields
            .iter()
            .map(|f| format!("s.{}", self.quote_ident(f)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "MERGE INTO {} AS t USING (VALUES {}) AS s ({}) ON {}",
            qualified,
            self.values_list(batch),
            cols,
            on
        );
        if !updates.is_empty() {
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", updates.join(", ")));
        }
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
            cols, source_cols
        ));
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let d = MssqlDialect;
        assert_eq!(d.quote_ident("users"), "[users]");
        assert_eq!(d.quote_ident("user]name"), "[user]]name]");
    }

    #[test]
    fn test_literals() {
        let d = MssqlDialect;
        assert_eq!(d.literal(&Value::Bool(true)), "1");
        assert_eq!(d.literal(&Value::from("it's")), "N'it''s'");
        assert_eq!(d.literal(&Value::Bytes(vec![0xde, 0xad])), "0xdead");
        assert_eq!(d.literal(&Value::Null), "NULL");
        assert_eq!(d.literal(&Value::I64(-3)), "-3");
    }

    #[test]
    fn test_offset_page_query() {
        let d = MssqlDialect;
        let table = Table::new("users", "id");
        let sql = d.page_query(&table, "[dbo].[users]", 1, 100, None);
        assert_eq!(
            sql,
            "SELECT * FROM [dbo].[users] ORDER BY id OFFSET 0 ROWS FETCH NEXT 100 ROWS ONLY"
        );
    }

    #[test]
    fn test_keyset_page_query() {
        let d = MssqlDialect;
        let mut table = Table::new("users", "id").with_keys(["id"]);
        table.where_sql = Some("active = 1".into());
        let sql = d.page_query(&table, "[dbo].[users]", 1, 10, Some(("id", Some(&Value::I64(42)))));
        assert_eq!(
            sql,
            "SELECT TOP 10 * FROM [dbo].[users] WHERE [id] > 42 AND (active = 1) ORDER BY [id]"
        );
    }

    #[test]
    fn test_first_keyset_page_orders_by_key() {
        let d = MssqlDialect;
        let table = Table::new("users", "name").with_keys(["id"]);
        let sql = d.page_query(&table, "[dbo].[users]", 1, 50, Some(("id", None)));
        assert_eq!(sql, "SELECT TOP 50 * FROM [dbo].[users] ORDER BY [id]");
    }

    #[test]
    fn test_merge_statement() {
        let d = MssqlDialect;
        let table = Table::new("users", "id").with_keys(["id"]);
        let batch = Batch {
            fields: vec!["id".into(), "name".into()],
            rows: vec![vec![Value::I64(1), Value::from("a")]],
        };
        let sql = d.upsert_statement("[dbo].[users]", &table, &batch);
        assert_eq!(
            sql,
            "MERGE INTO [dbo].[users] AS t USING (VALUES (1, N'a')) AS s ([id], [name]) \
             ON t.[id] = s.[id] WHEN MATCHED THEN UPDATE SET t.[name] = s.[name] \
             WHEN NOT MATCHED THEN INSERT ([id], [name]) VALUES (s.[id], s.[name]);"
        );
    }
}
