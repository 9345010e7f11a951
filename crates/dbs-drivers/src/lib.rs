//! Dialect drivers for dbstudio
//!
//! Each driver normalizes one database engine behind the [`Driver`] trait:
//! connection testing, row fetching with bound parameters, table listing and
//! table description. SQLite drivers additionally expose a
//! [`SqliteSchemaEditor`] for DDL that SQLite cannot express directly.

pub mod cloud;
pub mod postgres;
pub mod sqlite;
pub mod url;

pub use cloud::{CloudProvider, ConnectionDefaults, detect_provider, resolve_cloud_config};
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
pub use sqlite::schema::SqliteSchemaEditor;
pub use crate::url::{parse_connection_url, parse_postgres_url, resolve_config};

use async_trait::async_trait;
use dbs_core::{ConnectionConfig, Dialect, QueryResult, Result, SqlValue, TableInfo, TableSchema};
use std::sync::Arc;

/// Statement prefixes that produce a row set
const ROW_RETURNING_PREFIXES: &[&str] = &["select", "with", "pragma", "explain"];

/// Whether `execute_query` should fetch rows for this statement.
///
/// Only the leading keyword is inspected; the SQL is not parsed further.
pub fn returns_rows(sql: &str) -> bool {
    let lowered = sql.trim_start().to_ascii_lowercase();
    ROW_RETURNING_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// A live handle to one database
#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run `SELECT 1`
    async fn test_connection(&self) -> Result<()>;

    /// Run a statement and collect its rows
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Run a statement and return the affected row count
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Fetch or execute depending on the statement's leading keyword
    async fn execute_query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        if returns_rows(sql) {
            self.fetch(sql, params).await
        } else {
            let affected = self.execute(sql, params).await?;
            Ok(QueryResult::affected(affected))
        }
    }

    async fn get_tables(&self) -> Result<Vec<TableInfo>>;

    /// Read the current column definitions from the catalog
    async fn describe_table(&self, table: &str) -> Result<TableSchema>;

    async fn close(&self);

    /// DDL editor, only available for SQLite
    fn schema_editor(&self) -> Option<SqliteSchemaEditor> {
        None
    }
}

/// Open a driver for `config`, which must resolve to `dialect`.
///
/// URL configs are parsed first. Postgres configs go through the cloud
/// resolver before the pool is built.
pub async fn connect(dialect: Dialect, config: &ConnectionConfig) -> Result<Arc<dyn Driver>> {
    match resolve_config(config, dialect)? {
        ConnectionConfig::Sqlite(sqlite) => {
            let driver = SqliteDriver::open(&sqlite).await?;
            Ok(Arc::new(driver))
        }
        ConnectionConfig::Postgres(pg) => {
            let driver = PostgresDriver::connect(resolve_cloud_config(pg)).await?;
            Ok(Arc::new(driver))
        }
        ConnectionConfig::Url(_) => Err(dbs_core::Error::MalformedUrl(
            "URL did not resolve to a dialect".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbs_core::SqliteConfig;

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT * FROM users"));
        assert!(returns_rows("  with t as (select 1) select * from t"));
        assert!(returns_rows("PRAGMA table_info(users)"));
        assert!(returns_rows("explain query plan select 1"));
        assert!(!returns_rows("INSERT INTO users (name) VALUES ('a')"));
        assert!(!returns_rows("update users set name = 'b'"));
        assert!(!returns_rows("CREATE TABLE t (id INTEGER)"));
    }

    #[tokio::test]
    async fn test_connect_sqlite_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("by_url.db");
        let mut config = SqliteConfig::new(path.to_string_lossy());
        config.create_if_missing = true;
        SqliteDriver::open(&config).await.unwrap();

        let url = ConnectionConfig::Url(format!("sqlite://{}", path.display()));
        let driver = connect(Dialect::Sqlite, &url).await.unwrap();
        assert_eq!(driver.dialect(), Dialect::Sqlite);
        assert!(driver.schema_editor().is_some());

        let result = driver.execute_query("SELECT 1 AS one", &[]).await.unwrap();
        assert_eq!(result.columns, vec!["one"]);
        assert_eq!(result.rows[0]["one"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_connect_rejects_dialect_mismatch() {
        let config = ConnectionConfig::Sqlite(SqliteConfig::new("./nope.db"));
        let err = connect(Dialect::Postgres, &config).await.err().unwrap();
        assert!(matches!(err, dbs_core::Error::Validation(_)));
    }
}
