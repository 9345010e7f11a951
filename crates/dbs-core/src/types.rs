//! Shared data model for connections, schemas and query results

use crate::value::SqlValue;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Supported database dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(Error::validation(format!("Unknown database type '{}'", other))),
        }
    }
}

/// SQLite connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
    /// Create the database file when it does not exist
    #[serde(default, alias = "createIfMissing")]
    pub create_if_missing: bool,
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_if_missing: false,
        }
    }
}

/// TLS negotiation mode for Postgres connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
}

/// SSL settings; accepts either an object or a plain boolean on input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SslInput")]
pub struct SslConfig {
    pub mode: SslMode,
    pub reject_unauthorized: bool,
}

impl SslConfig {
    pub fn disabled() -> Self {
        Self {
            mode: SslMode::Disable,
            reject_unauthorized: false,
        }
    }

    /// TLS required, certificate not verified
    pub fn required() -> Self {
        Self {
            mode: SslMode::Require,
            reject_unauthorized: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != SslMode::Disable
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SslInput {
    Flag(bool),
    Config {
        #[serde(default = "default_ssl_mode")]
        mode: SslMode,
        #[serde(default, alias = "rejectUnauthorized")]
        reject_unauthorized: bool,
    },
}

fn default_ssl_mode() -> SslMode {
    SslMode::Require
}

impl From<SslInput> for SslConfig {
    fn from(input: SslInput) -> Self {
        match input {
            SslInput::Flag(true) => SslConfig::required(),
            SslInput::Flag(false) => SslConfig::disabled(),
            SslInput::Config {
                mode,
                reject_unauthorized,
            } => SslConfig {
                mode,
                reject_unauthorized,
            },
        }
    }
}

/// Postgres connection settings.
///
/// Optional fields left as `None` are filled by the cloud config resolver.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    #[serde(alias = "username")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslConfig>,
    #[serde(
        default,
        alias = "connectionTimeoutMillis",
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_timeout_ms: Option<u64>,
    #[serde(
        default,
        alias = "idleTimeoutMillis",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default, alias = "max", alias = "poolSize", skip_serializing_if = "Option::is_none")]
    pub pool_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
}

fn default_pg_port() -> u16 {
    5432
}

impl PostgresConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_pg_port(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ssl: None,
            connection_timeout_ms: None,
            idle_timeout_ms: None,
            pool_max: None,
            application_name: None,
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl", &self.ssl)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("pool_max", &self.pool_max)
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// Connection configuration: one dialect branch, or a URL to be parsed into one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionConfig {
    Sqlite(SqliteConfig),
    Postgres(PostgresConfig),
    Url(String),
}

impl ConnectionConfig {
    /// Build a config from an API request's `type` and `config` object.
    ///
    /// The object is either `{"url": "..."}` or the dialect's own fields.
    pub fn from_request(dialect: Dialect, config: JsonValue) -> Result<Self> {
        if let Some(url) = config.get("url").and_then(JsonValue::as_str) {
            return Ok(ConnectionConfig::Url(url.to_string()));
        }

        match dialect {
            Dialect::Sqlite => Ok(ConnectionConfig::Sqlite(
                serde_json::from_value(config)
                    .map_err(|e| Error::validation(format!("Invalid SQLite config: {}", e)))?,
            )),
            Dialect::Postgres => Ok(ConnectionConfig::Postgres(
                serde_json::from_value(config)
                    .map_err(|e| Error::validation(format!("Invalid Postgres config: {}", e)))?,
            )),
        }
    }

    /// Dialect of an already-structured config; `None` for an unparsed URL
    pub fn dialect(&self) -> Option<Dialect> {
        match self {
            ConnectionConfig::Sqlite(_) => Some(Dialect::Sqlite),
            ConnectionConfig::Postgres(_) => Some(Dialect::Postgres),
            ConnectionConfig::Url(_) => None,
        }
    }
}

/// A column definition, as read from the catalog or supplied by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub name: String,
    #[serde(alias = "type", alias = "data_type")]
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, alias = "primary_key")]
    pub primary_key: bool,
    #[serde(default, alias = "auto_increment", alias = "autoincrement")]
    pub auto_increment: bool,
    #[serde(
        default,
        alias = "default_value",
        alias = "default",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<DefaultValue>,
}

fn default_true() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            auto_increment: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Column default: a literal value or a raw SQL expression.
///
/// On input, a plain JSON value is a literal, except the SQL keywords
/// `CURRENT_TIMESTAMP`, `CURRENT_DATE`, `CURRENT_TIME` and `NULL`, which are
/// expressions. `{"expression": "..."}` always denotes an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum DefaultValue {
    Literal(SqlValue),
    Expression(String),
}

const DEFAULT_KEYWORDS: &[&str] = &["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME", "NULL"];

impl From<JsonValue> for DefaultValue {
    fn from(value: JsonValue) -> Self {
        if let Some(expr) = value.get("expression").and_then(JsonValue::as_str) {
            return DefaultValue::Expression(expr.to_string());
        }
        if let JsonValue::String(s) = &value {
            if DEFAULT_KEYWORDS.contains(&s.to_ascii_uppercase().as_str()) {
                return DefaultValue::Expression(s.to_ascii_uppercase());
            }
        }
        DefaultValue::Literal(value.into())
    }
}

impl From<DefaultValue> for JsonValue {
    fn from(value: DefaultValue) -> Self {
        match value {
            DefaultValue::Literal(v) => v.into(),
            DefaultValue::Expression(expr) => serde_json::json!({ "expression": expr }),
        }
    }
}

/// Table name plus its ordered columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// First column flagged as primary key
    pub fn primary_key(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.primary_key)
    }
}

/// Entry returned when listing a connection's tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table_type: String,
}

/// Rows returned by a query, or the affected-row count of a mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("SQLite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("mysql".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_connection_config_is_externally_tagged() {
        let config = ConnectionConfig::Sqlite(SqliteConfig::new("./sample.db"));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, json!({"sqlite": {"path": "./sample.db", "create_if_missing": false}}));

        let back: ConnectionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_request_prefers_url() {
        let config = ConnectionConfig::from_request(
            Dialect::Postgres,
            json!({"url": "postgres://u:p@localhost/db"}),
        )
        .unwrap();
        assert_eq!(
            config,
            ConnectionConfig::Url("postgres://u:p@localhost/db".to_string())
        );
    }

    #[test]
    fn test_from_request_postgres_camel_case_fields() {
        let config = ConnectionConfig::from_request(
            Dialect::Postgres,
            json!({
                "host": "db.example.com",
                "database": "app",
                "user": "admin",
                "password": "secret",
                "connectionTimeoutMillis": 5000,
                "max": 4,
                "ssl": true
            }),
        )
        .unwrap();

        let ConnectionConfig::Postgres(pg) = config else {
            panic!("expected postgres config");
        };
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.connection_timeout_ms, Some(5000));
        assert_eq!(pg.pool_max, Some(4));
        assert_eq!(pg.ssl, Some(SslConfig::required()));
    }

    #[test]
    fn test_debug_redacts_password() {
        let pg = PostgresConfig::new("localhost", "app", "admin", "hunter2");
        let debug = format!("{:?}", pg);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_default_value_keywords() {
        let d: DefaultValue = serde_json::from_value(json!("current_timestamp")).unwrap();
        assert_eq!(d, DefaultValue::Expression("CURRENT_TIMESTAMP".into()));

        let d: DefaultValue = serde_json::from_value(json!("it's")).unwrap();
        assert_eq!(d, DefaultValue::Literal(SqlValue::from("it's")));

        let d: DefaultValue = serde_json::from_value(json!({"expression": "'x'"})).unwrap();
        assert_eq!(d, DefaultValue::Expression("'x'".into()));
    }

    #[test]
    fn test_column_spec_accepts_client_field_names() {
        let spec: ColumnSpec = serde_json::from_value(json!({
            "name": "nickname",
            "type": "TEXT",
            "nullable": false,
            "default": "anon"
        }))
        .unwrap();
        assert_eq!(spec.data_type, "TEXT");
        assert!(!spec.nullable);
        assert!(!spec.primary_key);
        assert_eq!(
            spec.default_value,
            Some(DefaultValue::Literal(SqlValue::Text("anon".into())))
        );
    }

    #[test]
    fn test_primary_key_discovery() {
        let schema = TableSchema::new(
            "users",
            vec![
                ColumnSpec::new("name", "TEXT"),
                ColumnSpec::new("id", "INTEGER").primary_key(),
            ],
        );
        assert_eq!(schema.primary_key().unwrap().name, "id");
    }
}
