//! PostgreSQL writer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::Client;
use tracing::debug;

use crate::core::{Database, Script, ScriptBody, ScriptBuilder, Table, Writer};
use crate::drivers::sql::SqlScriptBuilder;
use crate::error::{FerryError, Result};

use super::{default_schema, PostgresDialect};

/// Executes SQL scripts inside an explicit transaction.
pub struct PostgresWriter {
    client: Client,
    builder: Arc<SqlScriptBuilder>,
    in_transaction: bool,
    target: String,
}

impl PostgresWriter {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            builder: Arc::new(SqlScriptBuilder::new(
                Arc::new(PostgresDialect),
                default_schema(db),
            )),
            in_transaction: false,
            target: db.server(),
        }
    }

    async fn control(&mut self, statement: &str) -> Result<()> {
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| FerryError::write(&self.target, format!("{}: {}", statement, e)))
    }
}

#[async_trait]
impl Writer for PostgresWriter {
    fn script_builder(&self) -> Arc<dyn ScriptBuilder> {
        self.builder.clone()
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.control("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.control("ROLLBACK").await
    }

    async fn exec_script(&mut self, table: &Table, script: Script) -> Result<u64> {
        let ScriptBody::Sql(statements) = script.body else {
            return Err(FerryError::write(
                &table.dest_name,
                "PostgreSQL writer expects SQL scripts",
            ));
        };
        for statement in &statements {
            self.client
                .batch_execute(statement)
                .await
                .map_err(|e| FerryError::write(&table.dest_name, e))?;
        }
        debug!(
            "{}: executed {} statements ({} rows)",
            table.dest_name,
            statements.len(),
            script.rows
        );
        Ok(script.rows as u64)
    }

    async fn close(&mut self) {
        if self.in_transaction {
            let _ = self.client.batch_execute("ROLLBACK").await;
            self.in_transaction = false;
        }
    }
}
