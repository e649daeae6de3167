//! PostgreSQL reader and schema assistant.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_postgres::Client;
use tracing::debug;

use crate::core::{Assistant, Database, QueryParams, Reader, Row, RowCursor, Table, TableInfo, Value};
use crate::drivers::sql::SqlDialect;
use crate::error::{FerryError, Result};

use super::{default_schema, PostgresDialect};

/// Paginated reads over one connection.
pub struct PostgresReader {
    client: Client,
    schema: String,
    dialect: PostgresDialect,
}

impl PostgresReader {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            schema: default_schema(db),
            dialect: PostgresDialect,
        }
    }
}

#[async_trait]
impl Reader for PostgresReader {
    fn supports_watermark(&self) -> bool {
        true
    }

    async fn query_count(&mut self, table: &Table, _params: &QueryParams) -> Result<u64> {
        let qualified = self.dialect.qualify(&self.schema, &table.name);
        let sql = self.dialect.count_query(table, &qualified);
        let row = self
            .client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| FerryError::read(&table.name, e))?;
        let count: i64 = row.try_get(0).map_err(|e| FerryError::read(&table.name, e))?;
        Ok(count.max(0) as u64)
    }

    async fn query_page(
        &mut self,
        table: &Table,
        from_row: u64,
        to_row: u64,
        params: &QueryParams,
    ) -> Result<RowCursor> {
        let qualified = self.dialect.qualify(&self.schema, &table.name);
        let sql = self.dialect.page_query(
            table,
            &qualified,
            from_row,
            to_row,
            params.keyset_bound(),
        );
        debug!("{}: {}", table.name, sql);

        let statement = self
            .client
            .prepare(&sql)
            .await
            .map_err(|e| FerryError::read(&table.name, e))?;
        let fields: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let types: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.type_().name().to_string())
            .collect();

        let rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(|e| FerryError::read(&table.name, e))?;

        let rows = rows
            .iter()
            .map(|row| {
                types
                    .iter()
                    .enumerate()
                    .map(|(idx, ty)| convert_value(row, idx, ty))
                    .collect::<Row>()
            })
            .collect();

        Ok(RowCursor::new(fields, rows))
    }
}

/// Convert a PostgreSQL row value by type name. Values of unsupported
/// types read as NULL.
fn convert_value(row: &tokio_postgres::Row, idx: usize, data_type: &str) -> Value {
    let value = match data_type {
        "bool" => row.try_get::<_, Option<bool>>(idx).ok().flatten().map(Value::Bool),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::I64(v.into())),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::I64(v.into())),
        "int8" => row.try_get::<_, Option<i64>>(idx).ok().flatten().map(Value::I64),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::F64(v.into())),
        "float8" => row.try_get::<_, Option<f64>>(idx).ok().flatten().map(Value::F64),
        "numeric" => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .ok()
            .flatten()
            .map(Value::Decimal),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .ok()
            .flatten()
            .map(Value::Uuid),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTime),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::DateTime(v.naive_utc())),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(Value::Date),
        "time" => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Text(v.to_string())),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Text(v.to_string())),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::Text),
    };
    value.unwrap_or(Value::Null)
}

/// Schema discovery from `information_schema` and `pg_catalog`.
pub struct PostgresAssistant {
    client: Client,
    schema: String,
}

impl PostgresAssistant {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            schema: default_schema(db),
        }
    }

    fn split<'a>(&'a self, name: &'a str) -> (&'a str, &'a str) {
        match name.rsplit_once('.') {
            Some((schema, table)) => (schema, table),
            None => (self.schema.as_str(), name),
        }
    }
}

#[async_trait]
impl Assistant for PostgresAssistant {
    async fn get_tables(&mut self) -> Result<Vec<TableInfo>> {
        let target = format!("schema {}", self.schema);
        let tables_sql = r#"
            SELECT table_name
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;
        let rows = self
            .client
            .query(tables_sql, &[&self.schema])
            .await
            .map_err(|e| FerryError::discovery(&target, e))?;

        let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();
        for row in rows {
            let name: String = row.get(0);
            let mut info = TableInfo::new(name.clone());
            info.schema = self.schema.clone();
            tables.insert(name, info);
        }

        let keys_sql = r#"
            SELECT t.relname, a.attname
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
            WHERE n.nspname = $1
              AND c.contype = 'p'
              AND a.attnum = ANY(c.conkey)
            ORDER BY t.relname, array_position(c.conkey, a.attnum)
        "#;
        let rows = self
            .client
            .query(keys_sql, &[&self.schema])
            .await
            .map_err(|e| FerryError::discovery(&target, e))?;
        for row in rows {
            let table: String = row.get(0);
            if let Some(info) = tables.get_mut(&table) {
                info.key_fields.push(row.get(1));
            }
        }

        let refs_sql = r#"
            SELECT DISTINCT t.relname, rn.nspname, rt.relname
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
            JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
            WHERE n.nspname = $1 AND c.contype = 'f'
            ORDER BY 1, 2, 3
        "#;
        let rows = self
            .client
            .query(refs_sql, &[&self.schema])
            .await
            .map_err(|e| FerryError::discovery(&target, e))?;
        for row in rows {
            let table: String = row.get(0);
            let ref_schema: String = row.get(1);
            let ref_table: String = row.get(2);
            if let Some(info) = tables.get_mut(&table) {
                if ref_schema == self.schema {
                    info.references.push(ref_table);
                } else {
                    info.references.push(format!("{}.{}", ref_schema, ref_table));
                }
            }
        }

        debug!("Discovered {} tables in {}", tables.len(), target);
        Ok(tables.into_values().collect())
    }

    async fn get_fields(&mut self, table: &str) -> Result<Vec<String>> {
        let (schema, name) = self.split(table);
        let query = r#"
            SELECT column_name
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;
        let rows = self
            .client
            .query(query, &[&schema, &name])
            .await
            .map_err(|e| FerryError::discovery(table, e))?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }
}
