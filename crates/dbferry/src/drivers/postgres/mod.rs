//! PostgreSQL plugin.
//!
//! One `tokio-postgres` client per reader, writer or assistant. Scripts are
//! literal SQL executed with the simple query protocol.

mod dialect;
mod reader;
mod tls;
mod writer;

pub use dialect::PostgresDialect;
pub use reader::{PostgresAssistant, PostgresReader};
pub use tls::TlsMode;
pub use writer::PostgresWriter;

use std::future::Future;
use std::time::Duration;

use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, warn};

use crate::core::{Assistant, Database, PluginRegistry, Reader, Writer};
use crate::error::{FerryError, Result};

/// Default port.
pub const DEFAULT_PORT: u16 = 5432;

/// Register the plugin's assistant, reader and writer under `name`.
pub fn register(registry: &mut PluginRegistry, name: &str) {
    registry.register_assistant(name, |db: Database| async move {
        let client = connect(&db).await?;
        Ok(Box::new(PostgresAssistant::new(client, &db)) as Box<dyn Assistant>)
    });
    registry.register_reader(name, |db: Database| async move {
        let client = connect(&db).await?;
        Ok(Box::new(PostgresReader::new(client, &db)) as Box<dyn Reader>)
    });
    registry.register_writer(name, |db: Database| async move {
        let client = connect(&db).await?;
        Ok(Box::new(PostgresWriter::new(client, &db)) as Box<dyn Writer>)
    });
}

/// Schema for unqualified names.
pub(crate) fn default_schema(db: &Database) -> String {
    if db.schema.is_empty() {
        "public".to_string()
    } else {
        db.schema.clone()
    }
}

fn pg_config(db: &Database) -> PgConfig {
    let mut config = PgConfig::new();
    config.host(if db.host.is_empty() { "localhost" } else { &db.host });
    config.port(if db.port == 0 { DEFAULT_PORT } else { db.port });
    config.dbname(&db.catalog);
    config.user(&db.user);
    config.password(&db.password);
    config.application_name("dbferry");
    if db.timeout > 0 {
        config.connect_timeout(Duration::from_secs(db.timeout));
    }
    if let Some(charset) = &db.charset {
        config.options(&format!("-c client_encoding={}", charset));
    }
    if db.compress {
        debug!("PostgreSQL has no wire compression; ignoring compress for {}", db.server());
    }
    config
}

/// Open one connection and drive it on a background task.
pub async fn connect(db: &Database) -> Result<Client> {
    let config = pg_config(db);
    let target = db.server();

    let client = if db.encrypt {
        let tls = tls::connector(TlsMode::for_database(db));
        let (client, connection) = config
            .connect(tls)
            .await
            .map_err(|e| FerryError::connect(&target, e))?;
        drive(target.clone(), connection);
        client
    } else {
        warn!("PostgreSQL TLS is disabled for {}", target);
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| FerryError::connect(&target, e))?;
        drive(target.clone(), connection);
        client
    };

    debug!("Connected to PostgreSQL {}/{}", target, db.catalog);
    Ok(client)
}

fn drive<F>(target: String, connection: F)
where
    F: Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("PostgreSQL connection to {} closed: {}", target, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema() {
        let mut db = Database::new("postgres");
        assert_eq!(default_schema(&db), "public");
        db.schema = "sales".into();
        assert_eq!(default_schema(&db), "sales");
    }

    #[test]
    fn test_pg_config_defaults() {
        let db = Database::new("postgres").with_catalog("shop");
        let config = pg_config(&db);
        assert_eq!(config.get_ports(), &[DEFAULT_PORT]);
        assert_eq!(config.get_dbname(), Some("shop"));
    }
}
