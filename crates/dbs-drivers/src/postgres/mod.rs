//! Postgres driver backed by a connection pool

mod decode;

use crate::Driver;
use crate::cloud::{ConnectionDefaults, detect_provider};
use async_trait::async_trait;
use dbs_core::{
    ColumnSpec, DefaultValue, Dialect, Error, PostgresConfig, QueryResult, Result, SqlValue,
    SslConfig, SslMode, TableInfo, TableSchema,
};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Database, Executor, Postgres, Row};
use std::time::Duration;

type PgQuery<'q> = Query<'q, Postgres, <Postgres as Database>::Arguments<'q>>;

/// One pool per registered connection, sized from `pool_max`
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    pool: PgPool,
    host: String,
    database: String,
}

/// Map SSL settings onto sqlx's modes; certificate verification upgrades
/// `require` to `verify-full`.
pub fn ssl_mode(ssl: &SslConfig) -> PgSslMode {
    match (ssl.mode, ssl.reject_unauthorized) {
        (SslMode::Disable, _) => PgSslMode::Disable,
        (SslMode::Prefer, _) => PgSslMode::Prefer,
        (SslMode::Require, false) => PgSslMode::Require,
        (SslMode::Require, true) => PgSslMode::VerifyFull,
    }
}

pub fn connect_options(config: &PostgresConfig) -> PgConnectOptions {
    let ssl = config.ssl.unwrap_or(ConnectionDefaults::GENERIC.ssl);
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .ssl_mode(ssl_mode(&ssl));
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if let Some(name) = &config.application_name {
        options = options.application_name(name);
    }
    options
}

pub fn pool_options(config: &PostgresConfig) -> PgPoolOptions {
    let defaults = ConnectionDefaults::GENERIC;
    PgPoolOptions::new()
        .max_connections(config.pool_max.unwrap_or(defaults.pool_max).max(1))
        .acquire_timeout(Duration::from_millis(
            config
                .connection_timeout_ms
                .unwrap_or(defaults.connection_timeout_ms),
        ))
        .idle_timeout(Some(Duration::from_millis(
            config.idle_timeout_ms.unwrap_or(defaults.idle_timeout_ms),
        )))
}

impl PostgresDriver {
    /// Build the pool and check out one connection to prove it works.
    ///
    /// `config` is expected to have been through the cloud resolver.
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        if let Some(provider) = detect_provider(&config.host) {
            tracing::info!(
                host = %config.host,
                provider = provider.name(),
                "Using managed Postgres connection defaults"
            );
        }

        let pool = pool_options(&config)
            .connect_with(connect_options(&config))
            .await
            .map_err(|e| {
                Error::connection(format!(
                    "Failed to connect to Postgres at {}:{}/{}: {}",
                    config.host, config.port, config.database, e
                ))
            })?;

        tracing::info!(host = %config.host, database = %config.database, "Connected to Postgres");
        Ok(Self {
            pool,
            host: config.host,
            database: config.database,
        })
    }
}

fn bind_params<'q>(mut query: PgQuery<'q>, params: &[SqlValue]) -> PgQuery<'q> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Timestamp(ts) => query.bind(*ts),
            SqlValue::List(_) => query.bind(JsonValue::from(value.clone())),
        };
    }
    query
}

/// Split `schema.table`; a bare name resolves against `current_schema()`
fn split_table(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

/// Interpret an `information_schema.columns.column_default`
fn parse_default(raw: &str) -> DefaultValue {
    let trimmed = raw.trim();
    // Literals come back cast, e.g. 'active'::character varying
    let (value, _) = match trimmed.rfind("::") {
        Some(pos) if trimmed.starts_with('\'') => trimmed.split_at(pos),
        _ => (trimmed, ""),
    };

    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return DefaultValue::Literal(SqlValue::Text(
            value[1..value.len() - 1].replace("''", "'"),
        ));
    }
    if let Ok(i) = value.parse::<i64>() {
        return DefaultValue::Literal(SqlValue::Int(i));
    }
    match value {
        "true" => DefaultValue::Literal(SqlValue::Bool(true)),
        "false" => DefaultValue::Literal(SqlValue::Bool(false)),
        _ => DefaultValue::Expression(trimmed.to_string()),
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        tracing::debug!(host = %self.host, sql = %sql, "Fetching Postgres rows");
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => match (&self.pool).describe(sql).await {
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

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        tracing::debug!(host = %self.host, sql = %sql, "Executing Postgres statement");
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_tables(&self) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT table_name::text AS name,
                   table_schema::text AS schema,
                   table_type::text AS table_type
            FROM information_schema.tables
            WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY table_schema, table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TableInfo {
                name: row.get("name"),
                schema: row.get("schema"),
                table_type: row.get("table_type"),
            })
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        let (schema, name) = split_table(table);

        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS name,
                   data_type::text AS data_type,
                   is_nullable = 'YES' AS nullable,
                   column_default::text AS column_default,
                   is_identity = 'YES' AS is_identity
            FROM information_schema.columns
            WHERE table_name::text = $1
            AND table_schema::text = COALESCE($2, current_schema()::text)
            ORDER BY ordinal_position
            "#,
        )
        .bind(name)
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::not_found(format!("Table '{}' not found", table)));
        }

        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
            AND tc.table_name::text = $1
            AND tc.table_schema::text = COALESCE($2, current_schema()::text)
            ORDER BY kcu.ordinal_position
            "#,
        )
        .bind(name)
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;

        let columns = rows
            .iter()
            .map(|row| {
                let column_name: String = row.get("name");
                let default: Option<String> = row.get("column_default");
                let is_identity: bool = row.try_get("is_identity").unwrap_or(false);
                let serial = default
                    .as_deref()
                    .map(|d| d.starts_with("nextval("))
                    .unwrap_or(false);

                ColumnSpec {
                    primary_key: keys.contains(&column_name),
                    name: column_name,
                    data_type: row.get("data_type"),
                    nullable: row.try_get("nullable").unwrap_or(true),
                    auto_increment: serial || is_identity,
                    default_value: default.as_deref().map(parse_default),
                }
            })
            .collect();

        Ok(TableSchema::new(table, columns))
    }

    async fn close(&self) {
        tracing::debug!(host = %self.host, database = %self.database, "Closing Postgres pool");
        self.pool.close().await;
    }
}
