//! Connection descriptors and table metadata.
//!
//! [`Table`] is the unit of transfer: configured fields come from the table
//! file, resolved fields (`source_fields`, `dest_fields`, `total`) are filled
//! in by prefetch. [`TableInfo`] is the discovery-time projection used only
//! for dependency leveling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection descriptor for one store.
///
/// Immutable once a connection is opened; tasks that reuse a descriptor
/// clone it.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Database {
    /// Dialect plugin name (case-insensitive registry key).
    pub dialect: String,

    /// Server host.
    #[serde(default)]
    pub host: String,

    /// Server port; 0 selects the dialect default.
    #[serde(default)]
    pub port: u16,

    /// Catalog (database) name.
    #[serde(default)]
    pub catalog: String,

    /// Default schema for unqualified table names.
    #[serde(default)]
    pub schema: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Client character set, when the dialect supports choosing one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,

    /// Require an encrypted connection.
    #[serde(default)]
    pub encrypt: bool,

    /// Accept the server certificate without verification.
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Request wire compression, when supported.
    #[serde(default)]
    pub compress: bool,

    /// Connect/command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("charset", &self.charset)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("compress", &self.compress)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Database {
    /// Descriptor for a dialect with every other field defaulted.
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
            host: String::new(),
            port: 0,
            catalog: String::new(),
            schema: String::new(),
            user: String::new(),
            password: String::new(),
            charset: None,
            encrypt: false,
            trust_server_cert: false,
            compress: false,
            timeout: default_timeout(),
        }
    }

    /// Set the catalog.
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = catalog.into();
        self
    }

    /// Server label for reports and logs.
    pub fn server(&self) -> String {
        if self.host.is_empty() {
            self.dialect.clone()
        } else if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Split a possibly schema-qualified name, falling back to this
    /// descriptor's default schema.
    pub fn split_name<'a>(&'a self, name: &'a str) -> (&'a str, &'a str) {
        match name.rsplit_once('.') {
            Some((schema, table)) => (schema, table),
            None => (self.schema.as_str(), name),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// Configured write mode of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Insert every row.
    #[default]
    #[serde(alias = "Append")]
    Append,

    /// Insert new rows, update rows whose key already exists.
    #[serde(alias = "Update")]
    Update,
}

/// Script shape a writer must build, derived from the task kind and the
/// table's write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Batch insert.
    #[default]
    Append,

    /// Insert-or-update by key.
    Upsert,

    /// Update non-key fields of existing rows in place, by key.
    Mask,
}

/// Migration unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Source table name, optionally schema-qualified.
    pub name: String,

    /// Destination table name; same as `name` when not configured.
    pub dest_name: String,

    /// Dependency level. 0 means "compute from references".
    pub order: i32,

    /// Rows per script.
    pub page_size: usize,

    /// Stable sort expression used for pagination.
    pub order_sql: String,

    /// Optional source filter expression.
    pub where_sql: Option<String>,

    /// Configured write mode.
    pub mode: WriteMode,

    /// Script shape for this run.
    pub strategy: WriteStrategy,

    /// Key field names (required for Update and masking).
    pub key_fields: Vec<String>,

    /// Source fields that are never written.
    pub skip_fields: Vec<String>,

    /// Row filter plugin name.
    pub filter: Option<String>,

    /// Names of tables this table references.
    pub references: Vec<String>,

    /// Source field list, resolved at prefetch.
    #[serde(default)]
    pub source_fields: Vec<String>,

    /// Destination field list, resolved at prefetch.
    #[serde(default)]
    pub dest_fields: Vec<String>,

    /// Source row count, resolved at prefetch.
    #[serde(default)]
    pub total: u64,
}

impl Table {
    /// Create a table with defaults: append mode, 1000 rows per script.
    pub fn new(name: impl Into<String>, order_sql: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dest_name: name.clone(),
            name,
            order: 0,
            page_size: 1000,
            order_sql: order_sql.into(),
            where_sql: None,
            mode: WriteMode::Append,
            strategy: WriteStrategy::Append,
            key_fields: Vec::new(),
            skip_fields: Vec::new(),
            filter: None,
            references: Vec::new(),
            source_fields: Vec::new(),
            dest_fields: Vec::new(),
            total: 0,
        }
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the key fields.
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the write mode.
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the referenced tables.
    pub fn with_references<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = refs.into_iter().map(Into::into).collect();
        self
    }

    /// The single key field, when the table has exactly one.
    pub fn single_key(&self) -> Option<&str> {
        match self.key_fields.as_slice() {
            [key] => Some(key.as_str()),
            _ => None,
        }
    }

    /// Whether a field is excluded from writes.
    pub fn is_skipped(&self, field: &str) -> bool {
        self.skip_fields.iter().any(|s| s.eq_ignore_ascii_case(field))
    }

    /// Whether a field is one of the key fields.
    pub fn is_key(&self, field: &str) -> bool {
        self.key_fields.iter().any(|k| k.eq_ignore_ascii_case(field))
    }

    /// Scheduling weight: total rows times field count.
    pub fn weight(&self) -> u64 {
        self.total
            .saturating_mul(self.source_fields.len().max(1) as u64)
    }
}

/// Discovery-time projection of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,

    /// Schema name (empty for stores without schemas).
    pub schema: String,

    /// Primary key field names.
    pub key_fields: Vec<String>,

    /// Names of the tables this table has foreign keys to.
    pub references: Vec<String>,

    /// Level computed by the resolver.
    pub order: i32,
}

impl TableInfo {
    /// Create a projection with no keys and no references.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: String::new(),
            key_fields: Vec::new(),
            references: Vec::new(),
            order: 0,
        }
    }

    /// Qualified name (`schema.name`, or `name` without a schema).
    pub fn full_name(&self) -> String {
        if self.schema.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_debug_redacts_password() {
        let mut db = Database::new("postgres");
        db.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", db);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }

    #[test]
    fn test_split_name_uses_default_schema() {
        let mut db = Database::new("postgres");
        db.schema = "public".into();
        assert_eq!(db.split_name("orders"), ("public", "orders"));
        assert_eq!(db.split_name("sales.orders"), ("sales", "orders"));
    }

    #[test]
    fn test_single_key() {
        let table = Table::new("orders", "id").with_keys(["id"]);
        assert_eq!(table.single_key(), Some("id"));

        let composite = Table::new("lines", "order_id, line").with_keys(["order_id", "line"]);
        assert_eq!(composite.single_key(), None);
    }

    #[test]
    fn test_weight_uses_field_count() {
        let mut table = Table::new("orders", "id");
        table.total = 1_000;
        table.source_fields = vec!["id".into(), "name".into(), "total".into()];
        assert_eq!(table.weight(), 3_000);
    }

    #[test]
    fn test_write_mode_accepts_capitalized_names() {
        let mode: WriteMode = serde_json::from_str("\"Update\"").unwrap();
        assert_eq!(mode, WriteMode::Update);
    }
}
