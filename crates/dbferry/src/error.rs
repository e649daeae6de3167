//! Error types for the transfer engine.

use std::fmt;

use thiserror::Error;

/// Coarse failure category, used for status decisions and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration. Nothing is scheduled.
    Config,
    /// Source or destination unreachable.
    Connect,
    /// Field or key lookup failed during prefetch.
    Discovery,
    /// Paginated query failed mid-stream.
    Read,
    /// Script execution failed.
    Write,
    /// Stop was requested.
    Cancelled,
    /// Local I/O or (de)serialization failure.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::Connect => "connect",
            ErrorKind::Discovery => "discovery",
            ErrorKind::Read => "read",
            ErrorKind::Write => "write",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        };
        f.write_str(s)
    }
}

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum FerryError {
    /// Configuration error (invalid profile or table file).
    #[error("Configuration error: {0}")]
    Config(String),

    /// No plugin registered under the requested name.
    #[error("No {capability} plugin registered as '{name}'")]
    PluginNotFound {
        capability: &'static str,
        name: String,
    },

    /// Could not open a connection.
    #[error("Cannot connect to {target}: {message}")]
    Connect { target: String, message: String },

    /// Metadata lookup failed for a table.
    #[error("Discovery failed for table {table}: {message}")]
    Discovery { table: String, message: String },

    /// Reading a page from the source failed.
    #[error("Read failed for table {table}: {message}")]
    Read { table: String, message: String },

    /// Executing a script against the destination failed.
    #[error("Write failed for table {table}: {message}")]
    Write { table: String, message: String },

    /// Stop was requested while the operation was in flight.
    #[error("Transfer cancelled")]
    Cancelled,

    /// PostgreSQL driver error.
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server driver error.
    #[cfg(feature = "mssql")]
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FerryError {
    /// Create a Connect error.
    pub fn connect(target: impl Into<String>, message: impl fmt::Display) -> Self {
        FerryError::Connect {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a Discovery error.
    pub fn discovery(table: impl Into<String>, message: impl fmt::Display) -> Self {
        FerryError::Discovery {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Read error.
    pub fn read(table: impl Into<String>, message: impl fmt::Display) -> Self {
        FerryError::Read {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Write error.
    pub fn write(table: impl Into<String>, message: impl fmt::Display) -> Self {
        FerryError::Write {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FerryError::Config(_) | FerryError::PluginNotFound { .. } => ErrorKind::Config,
            FerryError::Connect { .. } => ErrorKind::Connect,
            FerryError::Discovery { .. } => ErrorKind::Discovery,
            FerryError::Read { .. } => ErrorKind::Read,
            FerryError::Write { .. } => ErrorKind::Write,
            FerryError::Cancelled => ErrorKind::Cancelled,
            #[cfg(feature = "postgres")]
            FerryError::Postgres(_) => ErrorKind::Connect,
            #[cfg(feature = "mssql")]
            FerryError::Mssql(_) => ErrorKind::Connect,
            FerryError::Io(_) | FerryError::Yaml(_) | FerryError::Json(_) => ErrorKind::Io,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Config => 2,
            ErrorKind::Connect => 3,
            ErrorKind::Discovery | ErrorKind::Read | ErrorKind::Write => 4,
            ErrorKind::Cancelled => 130,
            ErrorKind::Io => 5,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, FerryError>;
