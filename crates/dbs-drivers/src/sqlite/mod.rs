//! SQLite driver
//!
//! A physical connection is opened per operation and closed afterwards, so
//! the driver itself is a cheap, cloneable set of connect options. An
//! in-memory database additionally pins one idle connection for the life of
//! the driver, since SQLite frees it once its last connection closes.

mod decode;
pub mod schema;

use crate::Driver;
use async_trait::async_trait;
use dbs_core::{
    Dialect, Error, QueryResult, Result, SqlValue, SqliteConfig, TableInfo, TableSchema,
    iso_timestamp,
};
use schema::SqliteSchemaEditor;
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Column, ConnectOptions, Connection, Database, Executor, Row, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, <Sqlite as Database>::Arguments<'q>>;

const IN_MEMORY: &str = ":memory:";

#[derive(Clone)]
pub struct SqliteDriver {
    options: SqliteConnectOptions,
    path: String,
    /// Keeps a `:memory:` database alive between operations
    keeper: Arc<Mutex<Option<SqliteConnection>>>,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteDriver {
    /// Build a driver and verify the database opens.
    ///
    /// A missing file is a connection error unless `create_if_missing` is set.
    pub async fn open(config: &SqliteConfig) -> Result<Self> {
        let in_memory = config.path == IN_MEMORY;
        let options = if in_memory {
            // Each parse names a distinct shared-cache database
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(config.create_if_missing)
        };

        let keeper = if in_memory {
            Some(options.connect().await.map_err(|e| {
                Error::connection(format!("Failed to open in-memory SQLite database: {}", e))
            })?)
        } else {
            None
        };

        let driver = Self {
            options,
            path: config.path.clone(),
            keeper: Arc::new(Mutex::new(keeper)),
        };

        driver.test_connection().await.map_err(|e| {
            Error::connection(format!(
                "Failed to open SQLite database '{}': {}",
                driver.path, e
            ))
        })?;

        tracing::debug!(path = %driver.path, "Opened SQLite database");
        Ok(driver)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Open a fresh physical connection
    pub(crate) async fn connect(&self) -> Result<SqliteConnection> {
        Ok(self.options.connect().await?)
    }

    pub(crate) async fn release(conn: SqliteConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Failed to close SQLite connection cleanly");
        }
    }
}

/// Bind every parameter in order
pub(crate) fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &[SqlValue]) -> SqliteQuery<'q> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Timestamp(ts) => query.bind(iso_timestamp(ts)),
            SqlValue::List(_) => query.bind(JsonValue::from(value.clone()).to_string()),
        };
    }
    query
}

/// Fetch rows on an open connection.
///
/// When no row comes back, column names are taken from the prepared
/// statement so empty results still carry a header.
pub(crate) async fn fetch_on(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<QueryResult> {
    let rows = bind_params(sqlx::query(sql), params)
        .fetch_all(&mut *conn)
        .await?;

    let columns = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => match (&mut *conn).describe(sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(_) => Vec::new(),
        },
    };

    Ok(QueryResult {
        columns,
        rows: rows.iter().map(decode::row_to_json).collect(),
        rows_affected: None,
    })
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn test_connection(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        let result = sqlx::query("SELECT 1").execute(&mut conn).await;
        Self::release(conn).await;
        result?;
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        tracing::debug!(path = %self.path, sql = %sql, "Fetching SQLite rows");
        let mut conn = self.connect().await?;
        let result = fetch_on(&mut conn, sql, params).await;
        Self::release(conn).await;
        result
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        tracing::debug!(path = %self.path, sql = %sql, "Executing SQLite statement");
        let mut conn = self.connect().await?;
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut conn)
            .await;
        Self::release(conn).await;
        Ok(result?.rows_affected())
    }

    async fn get_tables(&self) -> Result<Vec<TableInfo>> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT name, type
            FROM sqlite_master
            WHERE type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&mut conn)
        .await;
        Self::release(conn).await;

        let tables = rows?
            .iter()
            .map(|row| TableInfo {
                name: row.get("name"),
                schema: None,
                table_type: row.get("type"),
            })
            .collect();
        Ok(tables)
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        SqliteSchemaEditor::new(self.clone()).describe(table).await
    }

    async fn close(&self) {
        if let Some(conn) = self.keeper.lock().await.take() {
            Self::release(conn).await;
        }
    }

    fn schema_editor(&self) -> Option<SqliteSchemaEditor> {
        Some(SqliteSchemaEditor::new(self.clone()))
    }
}
