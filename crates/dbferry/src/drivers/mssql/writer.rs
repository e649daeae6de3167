//! SQL Server writer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::{Database, Script, ScriptBody, ScriptBuilder, Table, Writer};
use crate::drivers::sql::SqlScriptBuilder;
use crate::error::{FerryError, Result};

use super::{default_schema, run_batch, MssqlClient, MssqlDialect};

/// Executes T-SQL scripts inside an explicit transaction.
pub struct MssqlWriter {
    client: MssqlClient,
    builder: Arc<SqlScriptBuilder>,
    in_transaction: bool,
    target: String,
}

impl MssqlWriter {
    pub fn new(client: MssqlClient, db: &Database) -> Self {
        Self {
            client,
            builder: Arc::new(SqlScriptBuilder::new(Arc::new(MssqlDialect), default_schema(db))),
            in_transaction: false,
            target: db.server(),
        }
    }

    async fn control(&mut self, statement: &str) -> Result<()> {
        run_batch(&mut self.client, statement)
            .await
            .map_err(|e| FerryError::write(&self.target, format!("{}: {}", statement, e)))
    }
}

#[async_trait]
impl Writer for MssqlWriter {
    fn script_builder(&self) -> Arc<dyn ScriptBuilder> {
        self.builder.clone()
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.control("SET XACT_ABORT ON; BEGIN TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.control("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.control("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }

    async fn exec_script(&mut self, table: &Table, script: Script) -> Result<u64> {
        let ScriptBody::Sql(statements) = script.body else {
            return Err(FerryError::write(
                &table.dest_name,
                "SQL Server writer expects SQL scripts",
            ));
        };
        for statement in &statements {
            run_batch(&mut self.client, statement)
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
            let _ = run_batch(&mut self.client, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await;
            self.in_transaction = false;
        }
    }
}
