//! SQL Server plugin.
//!
//! One `tiberius` client per reader, writer or assistant over a tokio TCP
//! stream. Scripts run as literal T-SQL batches.

mod dialect;
mod reader;
mod writer;

pub use dialect::MssqlDialect;
pub use reader::{MssqlAssistant, MssqlReader};
pub use writer::MssqlWriter;

use std::time::Duration;

use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::core::{Assistant, Database, PluginRegistry, Reader, Writer};
use crate::error::{FerryError, Result};

/// Default port.
pub const DEFAULT_PORT: u16 = 1433;

/// Connected client type.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Register the plugin's assistant, reader and writer under `name`.
pub fn register(registry: &mut PluginRegistry, name: &str) {
    registry.register_assistant(name, |db: Database| async move {
        let client = connect(&db).await?;
        Ok(Box::new(MssqlAssistant::new(client, &db)) as Box<dyn Assistant>)
    });
    registry.register_reader(name, |db: Database| async move {
        let client = connect(&db).await?;
        Ok(Box::new(MssqlReader::new(client, &db)) as Box<dyn Reader>)
    });
    registry.register_writer(name, |db: Database| async move {
        let client = connect(&db).await?;
        Ok(Box::new(MssqlWriter::new(client, &db)) as Box<dyn Writer>)
    });
}

/// Schema for unqualified names.
pub(crate) fn default_schema(db: &Database) -> String {
    if db.schema.is_empty() {
        "dbo".to_string()
    } else {
        db.schema.clone()
    }
}

fn build_config(db: &Database) -> Config {
    let mut config = Config::new();
    config.host(if db.host.is_empty() { "localhost" } else { &db.host });
    config.port(if db.port == 0 { DEFAULT_PORT } else { db.port });
    if !db.catalog.is_empty() {
        config.database(&db.catalog);
    }
    config.application_name("dbferry");
    config.authentication(AuthMethod::sql_server(&db.user, &db.password));

    if db.encrypt {
        if db.trust_server_cert {
            config.trust_cert();
        }
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }

    config
}

async fn open(config: Config) -> std::result::Result<MssqlClient, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| tiberius::error::Error::Io {
            kind: e.kind(),
            message: e.to_string(),
        })?;
    tcp.set_nodelay(true).ok();
    Client::connect(config, tcp.compat_write()).await
}

/// Open one connection, bounded by the descriptor's timeout.
pub async fn connect(db: &Database) -> Result<MssqlClient> {
    let target = db.server();
    if db.charset.is_some() || db.compress {
        debug!("SQL Server ignores charset/compress settings for {}", target);
    }
    let config = build_config(db);

    let client = if db.timeout > 0 {
        tokio::time::timeout(Duration::from_secs(db.timeout), open(config))
            .await
            .map_err(|_| FerryError::connect(&target, format!("timed out after {}s", db.timeout)))?
    } else {
        open(config).await
    }
    .map_err(|e| FerryError::connect(&target, e))?;

    debug!("Connected to SQL Server {}/{}", target, db.catalog);
    Ok(client)
}

/// Drain a batch that returns no rows.
pub(crate) async fn run_batch(
    client: &mut MssqlClient,
    sql: &str,
) -> std::result::Result<(), tiberius::error::Error> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema() {
        let mut db = Database::new("mssql");
        assert_eq!(default_schema(&db), "dbo");
        db.schema = "sales".into();
        assert_eq!(default_schema(&db), "sales");
    }

    #[test]
    fn test_config_address() {
        let mut db = Database::new("mssql");
        db.host = "sql01".into();
        let config = build_config(&db);
        assert_eq!(config.get_addr(), "sql01:1433");
    }
}
