//! PostgreSQL SQL dialect.

use crate::core::{Batch, Table, Value};
use crate::drivers::sql::{where_clause, SqlDialect};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
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
        let mut sql = format!("SELECT {} FROM {}", self.select_list(table), qualified);

        let mut conditions = Vec::new();
        if let Some((key, Some(mark))) = keyset {
            conditions.push(format!("{} > {}", self.quote_ident(key), self.literal(mark)));
        }
        if let Some(w) = where_clause(table) {
            conditions.push(format!("({})", w));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        match keyset {
            Some((key, _)) => {
                sql.push_str(&format!(" ORDER BY {} LIMIT {}", self.quote_ident(key), count));
            }
            None => {
                sql.push_str(&format!(
                    " ORDER BY {} LIMIT {} OFFSET {}",
                    table.order_sql,
                    count,
                    from_row.saturating_sub(1)
                ));
            }
        }
        sql
    }

    fn upsert_statement(&self, qualified: &str, table: &Table, batch: &Batch) -> String {
        let keys = self.column_list(&table.key_fields);
        let updates: Vec<String> = batch
            .fields
            .iter()
            .filter(|f| !table.is_key(f))
            .map(|f| {
                let col = self.quote_ident(f);
                format!("{} = EXCLUDED.{}", col, col)
            })
            .collect();

        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        format!(
            "{} ON CONFLICT ({}) {}",
            self.insert_statement(qualified, batch),
            keys,
            action
        )
    }
}
