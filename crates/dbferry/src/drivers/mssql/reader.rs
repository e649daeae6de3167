//! SQL Server reader and schema assistant.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tiberius::{ColumnData, FromSql};
use tracing::debug;

use crate::core::{Assistant, Database, QueryParams, Reader, Row, RowCursor, Table, TableInfo, Value};
use crate::drivers::sql::SqlDialect;
use crate::error::{FerryError, Result};

use super::{default_schema, MssqlClient, MssqlDialect};

/// Paginated reads over one connection.
pub struct MssqlReader {
    client: MssqlClient,
    schema: String,
    dialect: MssqlDialect,
}

impl MssqlReader {
    pub fn new(client: MssqlClient, db: &Database) -> Self {
        Self {
            client,
            schema: default_schema(db),
            dialect: MssqlDialect,
        }
    }
}

#[async_trait]
impl Reader for MssqlReader {
    fn supports_watermark(&self) -> bool {
        true
    }

    async fn query_count(&mut self, table: &Table, _params: &QueryParams) -> Result<u64> {
        let qualified = self.dialect.qualify(&self.schema, &table.name);
        let sql = self.dialect.count_query(table, &qualified);
        let row = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| FerryError::read(&table.name, e))?
            .into_row()
            .await
            .map_err(|e| FerryError::read(&table.name, e))?;
        let count = row
            .and_then(|r| r.get::<i64, _>(0))
            .ok_or_else(|| FerryError::read(&table.name, "count returned no rows"))?;
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

        let mut stream = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| FerryError::read(&table.name, e))?;
        let fields: Vec<String> = stream
            .columns()
            .await
            .map_err(|e| FerryError::read(&table.name, e))?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| FerryError::read(&table.name, e))?;

        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|data| convert_value(&data)).collect::<Row>())
            .collect();

        Ok(RowCursor::new(fields, rows))
    }
}

/// Convert a TDS column value.
fn convert_value(data: &ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::U8(v) => v.map(|v| Value::I64(v.into())),
        ColumnData::I16(v) => v.map(|v| Value::I64(v.into())),
        ColumnData::I32(v) => v.map(|v| Value::I64(v.into())),
        ColumnData::I64(v) => v.map(Value::I64),
        ColumnData::F32(v) => v.map(|v| Value::F64(v.into())),
        ColumnData::F64(v) => v.map(Value::F64),
        ColumnData::Guid(v) => v.map(Value::Uuid),
        ColumnData::String(v) => v.as_ref().map(|s| Value::Text(s.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::Bytes(b.to_vec())),
        ColumnData::Numeric(_) => rust_decimal::Decimal::from_sql(data)
            .ok()
            .flatten()
            .map(Value::Decimal),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| Value::Text((**x).clone().into_string())),
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .map(Value::Date),
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map(|t| Value::Text(t.to_string())),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::Utc>::from_sql(data)
            .ok()
            .flatten()
            .map(|t| Value::DateTime(t.naive_utc())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(data)
                .ok()
                .flatten()
                .map(Value::DateTime)
        }
        #[allow(unreachable_patterns)]
        _ => None,
    };
    value.unwrap_or(Value::Null)
}

/// Schema discovery from `INFORMATION_SCHEMA` and `sys` views.
pub struct MssqlAssistant {
    client: MssqlClient,
    schema: String,
}

impl MssqlAssistant {
    pub fn new(client: MssqlClient, db: &Database) -> Self {
        Self {
            client,
            schema: default_schema(db),
        }
    }

    async fn rows(&mut self, sql: &str, target: &str, args: &[&str]) -> Result<Vec<tiberius::Row>> {
        let mut query = tiberius::Query::new(sql);
        for arg in args {
            query.bind(arg.to_string());
        }
        query
            .query(&mut self.client)
            .await
            .map_err(|e| FerryError::discovery(target, e))?
            .into_first_result()
            .await
            .map_err(|e| FerryError::discovery(target, e))
    }
}

fn text(row: &tiberius::Row, idx: usize) -> String {
    row.get::<&str, _>(idx).unwrap_or_default().to_string()
}

#[async_trait]
impl Assistant for MssqlAssistant {
    async fn get_tables(&mut self) -> Result<Vec<TableInfo>> {
        let schema = self.schema.clone();
        let target = format!("schema {}", schema);

        let rows = self
            .rows(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
                &target,
                &[schema.as_str()],
            )
            .await?;
        let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();
        for row in &rows {
            let name = text(row, 0);
            let mut info = TableInfo::new(name.clone());
            info.schema = schema.clone();
            tables.insert(name, info);
        }

        let rows = self
            .rows(
                "SELECT kcu.TABLE_NAME, kcu.COLUMN_NAME \
                 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                 JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                   ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
                  AND kcu.TABLE_SCHEMA = tc.TABLE_SCHEMA \
                 WHERE tc.TABLE_SCHEMA = @P1 AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
                 ORDER BY kcu.TABLE_NAME, kcu.ORDINAL_POSITION",
                &target,
                &[schema.as_str()],
            )
            .await?;
        for row in &rows {
            if let Some(info) = tables.get_mut(&text(row, 0)) {
                info.key_fields.push(text(row, 1));
            }
        }

        let rows = self
            .rows(
                "SELECT DISTINCT OBJECT_NAME(fk.parent_object_id), \
                        OBJECT_SCHEMA_NAME(fk.referenced_object_id), \
                        OBJECT_NAME(fk.referenced_object_id) \
                 FROM sys.foreign_keys fk \
                 WHERE OBJECT_SCHEMA_NAME(fk.parent_object_id) = @P1",
                &target,
                &[schema.as_str()],
            )
            .await?;
        for row in &rows {
            let (ref_schema, ref_table) = (text(row, 1), text(row, 2));
            if let Some(info) = tables.get_mut(&text(row, 0)) {
                if ref_schema.eq_ignore_ascii_case(&schema) {
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
        let (schema, name) = match table.rsplit_once('.') {
            Some((schema, name)) => (schema.to_string(), name.to_string()),
            None => (self.schema.clone(), table.to_string()),
        };
        let rows = self
            .rows(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 ORDER BY ORDINAL_POSITION",
                table,
                &[schema.as_str(), name.as_str()],
            )
            .await?;
        Ok(rows.iter().map(|r| text(r, 0)).collect())
    }
}
