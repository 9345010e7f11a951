//! Live connections keyed by id

use crate::migrations::seed_sample_data;
use crate::store::SystemStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dbs_core::{
    ConnectionConfig, Dialect, Error, QueryResult, Result, SqlValue, SqliteConfig, TableInfo,
    TableSchema,
};
use dbs_drivers::{Driver, SqliteDriver, SqliteSchemaEditor, returns_rows};
use dbs_telemetry::{QuerySpanAttributes, query_span, statement_verb};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::sync::{Arc, OnceLock};
use tracing::Instrument;

/// Lifecycle of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed(_) => "failed",
        }
    }
}

struct Slot {
    name: String,
    dialect: Dialect,
    /// Config after URL parsing, used for summaries
    config: ConnectionConfig,
    state: ConnectionState,
    driver: Option<Arc<dyn Driver>>,
}

/// Outcome of a throwaway connection test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

/// Listing entry for one registered connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub dialect: Dialect,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub is_connected: bool,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Registry of live database connections.
///
/// Built once at startup and shared behind an `Arc`. Map guards are never
/// held across an await.
pub struct ConnectionRegistry {
    slots: DashMap<String, Slot>,
    system_path: String,
    system_id: String,
    store: OnceLock<SystemStore>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("system_path", &self.system_path)
            .field("system_id", &self.system_id)
            .field("connections", &self.slots.len())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry. Nothing is opened until
    /// [`setup_default_connection`](Self::setup_default_connection).
    pub fn new(system_path: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            slots: DashMap::new(),
            system_path: system_path.into(),
            system_id: system_id.into(),
            store: OnceLock::new(),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Open the system database, migrate and seed it, then register it
    pub async fn setup_default_connection(&self) -> Result<Arc<dyn Driver>> {
        let config = SqliteConfig {
            path: self.system_path.clone(),
            create_if_missing: true,
        };
        let driver: Arc<dyn Driver> = Arc::new(SqliteDriver::open(&config).await?);

        let store = SystemStore::open(driver.clone()).await?;
        seed_sample_data(driver.clone()).await?;
        if self.store.set(store).is_err() {
            tracing::debug!("System store already initialized");
        }

        self.create_connection(
            Dialect::Sqlite,
            ConnectionConfig::Sqlite(config),
            &self.system_id,
            "System Database",
            false,
        )
        .await?;

        tracing::info!(
            connection_id = %self.system_id,
            path = %self.system_path,
            "System database ready"
        );
        self.driver(&self.system_id)
    }

    /// Driver of the system connection
    pub fn system_driver(&self) -> Result<Arc<dyn Driver>> {
        self.driver(&self.system_id)
    }

    /// Open a connection and register it under `id`.
    ///
    /// A previous live handle for the same id is closed only once the new one
    /// is registered; if the new one cannot be opened or saved, the previous
    /// handle stays in place. The config is saved to the system database when
    /// `persist` is set, except for the system connection itself.
    pub async fn create_connection(
        &self,
        dialect: Dialect,
        config: ConnectionConfig,
        id: &str,
        name: &str,
        persist: bool,
    ) -> Result<()> {
        let resolved = dbs_drivers::resolve_config(&config, dialect)?;
        let previous = self.reserve(id, name, dialect, resolved.clone())?;

        tracing::info!(connection_id = %id, dialect = %dialect, "Opening connection");
        let driver = match dbs_drivers::connect(dialect, &resolved).await {
            Ok(driver) => driver,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Connection failed");
                self.settle_failure(id, previous, e.to_string());
                return Err(match e {
                    Error::Connection(msg) => Error::Connection(msg),
                    other => Error::connection(other.to_string()),
                });
            }
        };

        if !self.slots.contains_key(id) {
            driver.close().await;
            if let Some(driver) = previous.and_then(|slot| slot.driver) {
                driver.close().await;
            }
            return Err(Error::not_found(format!(
                "Connection '{}' was removed while connecting",
                id
            )));
        }

        if persist && id != self.system_id {
            if let Some(store) = self.store.get() {
                if let Err(e) = store.upsert(id, name, dialect, &config).await {
                    tracing::warn!(connection_id = %id, error = %e, "Failed to save connection");
                    driver.close().await;
                    self.settle_failure(id, previous, e.to_string());
                    return Err(e);
                }
            } else {
                tracing::debug!(connection_id = %id, "No system store, not saving connection");
            }
        }

        if let Some(mut slot) = self.slots.get_mut(id) {
            slot.state = ConnectionState::Connected;
            slot.driver = Some(driver);
        }
        if let Some(driver) = previous.and_then(|slot| slot.driver) {
            driver.close().await;
        }

        tracing::info!(connection_id = %id, "Connection established");
        Ok(())
    }

    /// Put a replaced live entry back, or mark a new entry failed
    fn settle_failure(&self, id: &str, previous: Option<Slot>, reason: String) {
        match previous {
            Some(slot) if slot.state == ConnectionState::Connected && slot.driver.is_some() => {
                tracing::info!(connection_id = %id, "Keeping previous connection");
                self.slots.insert(id.to_string(), slot);
            }
            _ => {
                if let Some(mut slot) = self.slots.get_mut(id) {
                    slot.state = ConnectionState::Failed(reason);
                    slot.driver = None;
                }
            }
        }
    }

    /// Mark `id` as connecting and hand back the entry it replaces
    fn reserve(
        &self,
        id: &str,
        name: &str,
        dialect: Dialect,
        config: ConnectionConfig,
    ) -> Result<Option<Slot>> {
        let slot = Slot {
            name: name.to_string(),
            dialect,
            config,
            state: ConnectionState::Connecting,
            driver: None,
        };
        match self.slots.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state == ConnectionState::Connecting {
                    return Err(Error::validation(format!(
                        "Connection '{}' is already being established",
                        id
                    )));
                }
                Ok(Some(std::mem::replace(entry.get_mut(), slot)))
            }
            Entry::Vacant(entry) => {
                entry.insert(slot);
                Ok(None)
            }
        }
    }

    /// Open a throwaway driver and run `SELECT 1`. Never touches the registry.
    pub async fn test_connection(&self, dialect: Dialect, config: &ConnectionConfig) -> ConnectionTestResult {
        let outcome = match dbs_drivers::connect(dialect, config).await {
            Ok(driver) => {
                let outcome = driver.test_connection().await;
                driver.close().await;
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => ConnectionTestResult {
                success: true,
                message: "Connection successful".to_string(),
                details: Some(json!({ "type": dialect })),
            },
            Err(e) => {
                tracing::debug!(dialect = %dialect, error = %e, "Connection test failed");
                ConnectionTestResult {
                    success: false,
                    message: "Connection failed".to_string(),
                    details: Some(json!({ "type": dialect, "error": e.to_string() })),
                }
            }
        }
    }

    /// Live driver for `id`
    pub fn driver(&self, id: &str) -> Result<Arc<dyn Driver>> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| Error::not_found(format!("Connection '{}' not found", id)))?;

        match (&slot.state, &slot.driver) {
            (ConnectionState::Connected, Some(driver)) => Ok(driver.clone()),
            (ConnectionState::Failed(reason), _) => Err(Error::connection(format!(
                "Connection '{}' failed: {}",
                id, reason
            ))),
            _ => Err(Error::connection(format!("Connection '{}' is not ready", id))),
        }
    }

    pub fn state(&self, id: &str) -> Option<ConnectionState> {
        self.slots.get(id).map(|slot| slot.state.clone())
    }

    /// Run arbitrary SQL on a registered connection
    pub async fn execute_query(&self, id: &str, sql: &str, values: &[SqlValue]) -> Result<QueryResult> {
        let driver = self.driver(id)?;
        let dialect = driver.dialect();
        let span = query_span(QuerySpanAttributes {
            connection_id: id,
            dialect: dialect.as_str(),
            sql,
        });

        async move {
            if returns_rows(sql) {
                tracing::debug!(sql = %sql, params = values.len(), "Running query");
            } else {
                tracing::warn!(
                    connection_id = %id,
                    operation = %statement_verb(sql),
                    "Running write statement from query endpoint"
                );
            }
            driver.execute_query(sql, values).await
        }
        .instrument(span)
        .await
    }

    pub async fn get_tables(&self, id: &str) -> Result<Vec<TableInfo>> {
        self.driver(id)?.get_tables().await
    }

    pub async fn describe_table(&self, id: &str, table: &str) -> Result<TableSchema> {
        self.driver(id)?.describe_table(table).await
    }

    /// DDL editor for a SQLite connection
    pub fn schema_editor(&self, id: &str) -> Result<SqliteSchemaEditor> {
        let driver = self.driver(id)?;
        driver.schema_editor().ok_or_else(|| {
            Error::Unsupported(format!(
                "Schema editing is not available for {} connections",
                driver.dialect()
            ))
        })
    }

    /// Summaries of every entry, sorted by id
    pub fn list(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<ConnectionSummary> = self
            .slots
            .iter()
            .map(|entry| {
                let slot = entry.value();
                let (database, host, port) = match &slot.config {
                    ConnectionConfig::Sqlite(c) => (c.path.clone(), None, None),
                    ConnectionConfig::Postgres(c) => {
                        (c.database.clone(), Some(c.host.clone()), Some(c.port))
                    }
                    ConnectionConfig::Url(_) => (String::new(), None, None),
                };
                let error = match &slot.state {
                    ConnectionState::Failed(reason) => Some(reason.clone()),
                    _ => None,
                };

                ConnectionSummary {
                    id: entry.key().clone(),
                    name: slot.name.clone(),
                    dialect: slot.dialect,
                    database,
                    host,
                    port,
                    is_connected: slot.state == ConnectionState::Connected,
                    state: slot.state.as_str(),
                    error,
                }
            })
            .collect();

        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Remove `id`, close its handle and mark its saved row inactive
    pub async fn drop_connection(&self, id: &str) -> Result<()> {
        if id == self.system_id {
            return Err(Error::validation("The system connection cannot be removed"));
        }

        let (_, slot) = self
            .slots
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("Connection '{}' not found", id)))?;

        if let Some(driver) = slot.driver {
            driver.close().await;
        }
        if let Some(store) = self.store.get() {
            store.deactivate(id).await?;
        }

        tracing::info!(connection_id = %id, "Connection removed");
        Ok(())
    }

    /// Reconnect every saved active connection; returns how many came up
    pub async fn load_saved_connections(&self) -> Result<usize> {
        let Some(store) = self.store.get() else {
            return Ok(0);
        };

        let mut restored = 0;
        for saved in store.active_connections().await? {
            if saved.id == self.system_id {
                continue;
            }
            match self
                .create_connection(saved.dialect, saved.config, &saved.id, &saved.name, false)
                .await
            {
                Ok(()) => restored += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %saved.id, error = %e, "Failed to restore saved connection")
                }
            }
        }

        tracing::info!(restored, "Loaded saved connections");
        Ok(restored)
    }

    /// Close every handle
    pub async fn close_all(&self) {
        let drivers: Vec<Arc<dyn Driver>> = self
            .slots
            .iter_mut()
            .filter_map(|mut entry| entry.driver.take())
            .collect();
        self.slots.clear();

        for driver in drivers {
            driver.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dbs_core::ColumnSpec;
    use serde_json::json;

    struct PgStub;

    #[async_trait]
    impl Driver for PgStub {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch(&self, _sql: &str, _params: &[SqlValue]) -> Result<QueryResult> {
            Ok(QueryResult::default())
        }

        async fn execute(&self, _sql: &str, _params: &[SqlValue]) -> Result<u64> {
            Ok(0)
        }

        async fn get_tables(&self) -> Result<Vec<TableInfo>> {
            Ok(Vec::new())
        }

        async fn describe_table(&self, table: &str) -> Result<TableSchema> {
            Ok(TableSchema::new(table, Vec::new()))
        }

        async fn close(&self) {}
    }

    async fn registry(dir: &tempfile::TempDir) -> ConnectionRegistry {
        let path = dir.path().join("sample.db");
        let registry = ConnectionRegistry::new(path.to_string_lossy(), "default");
        registry.setup_default_connection().await.unwrap();
        registry
    }

    fn sample_config(dir: &tempfile::TempDir) -> ConnectionConfig {
        ConnectionConfig::Sqlite(SqliteConfig::new(
            dir.path().join("sample.db").to_string_lossy(),
        ))
    }

    #[tokio::test]
    async fn test_registered_sqlite_lists_seeded_tables() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir).await;
        registry
            .create_connection(Dialect::Sqlite, sample_config(&dir), "db1", "Test", true)
            .await
            .unwrap();

        let names: Vec<String> = registry
            .get_tables("db1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        for table in ["connections", "users", "products", "orders"] {
            assert!(names.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[tokio::test]
    async fn test_query_by_id_returns_seeded_user() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir).await;

        let result = registry
            .execute_query("default", "SELECT * FROM users WHERE id = ?", &[SqlValue::Int(1)])
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], json!("John Doe"));
    }

    #[tokio::test]
    async fn test_add_column_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir).await;

        let editor = registry.schema_editor("default").unwrap();
        editor
            .add_column("users", &ColumnSpec::new("nickname", "TEXT"))
            .await
            .unwrap();

        let schema = registry.describe_table("default", "users").await.unwrap();
        assert_eq!(schema.columns.len(), 9);
        let count = registry
            .execute_query("default", "SELECT COUNT(*) AS n FROM users", &[])
            .await
            .unwrap();
        assert_eq!(count.rows[0]["n"], json!(5));
    }

    #[tokio::test]
    async fn test_connection_test_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new("unused.db", "default");
        let config = sample_config(&dir);

        let first = registry.test_connection(Dialect::Sqlite, &config).await;
        let second = registry.test_connection(Dialect::Sqlite, &config).await;
        assert!(!first.success);
        assert_eq!(first.success, second.success);
        assert!(registry.list().is_empty());

        let ok = registry.test_connection(Dialect::Sqlite, &ConnectionConfig::Url(":memory:".into())).await;
        assert!(ok.success);
        assert_eq!(ok.details, Some(json!({ "type": "sqlite" })));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = ConnectionRegistry::new("unused.db", "default");
        let err = registry.execute_query("nope", "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(matches!(registry.schema_editor("nope"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_schema_editor_requires_sqlite() {
        let registry = ConnectionRegistry::new("unused.db", "default");
        registry.slots.insert(
            "pg".to_string(),
            Slot {
                name: "PG".to_string(),
                dialect: Dialect::Postgres,
                config: ConnectionConfig::Url("postgres://u@h/db".into()),
                state: ConnectionState::Connected,
                driver: Some(Arc::new(PgStub)),
            },
        );

        assert!(matches!(registry.schema_editor("pg"), Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_concurrent_create_is_rejected() {
        let registry = ConnectionRegistry::new("unused.db", "default");
        let config = ConnectionConfig::Sqlite(SqliteConfig::new(":memory:"));

        registry.reserve("db1", "One", Dialect::Sqlite, config.clone()).unwrap();
        assert_eq!(registry.state("db1"), Some(ConnectionState::Connecting));
        let err = registry
            .create_connection(Dialect::Sqlite, config, "db1", "One", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_failed_connection_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new("unused.db", "default");
        let missing = ConnectionConfig::Sqlite(SqliteConfig::new(
            dir.path().join("missing.db").to_string_lossy(),
        ));

        let err = registry
            .create_connection(Dialect::Sqlite, missing, "gone", "Gone", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_connected);
        assert_eq!(listed[0].state, "failed");
        assert!(matches!(registry.driver("gone"), Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_recreate_with_bad_config_keeps_old_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir).await;
        registry
            .create_connection(Dialect::Sqlite, sample_config(&dir), "db1", "Test", false)
            .await
            .unwrap();

        let missing = ConnectionConfig::Sqlite(SqliteConfig::new(
            dir.path().join("missing.db").to_string_lossy(),
        ));
        let err = registry
            .create_connection(Dialect::Sqlite, missing, "db1", "Broken", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));

        assert_eq!(registry.state("db1"), Some(ConnectionState::Connected));
        let listed = registry.list();
        let db1 = listed.iter().find(|s| s.id == "db1").unwrap();
        assert_eq!(db1.name, "Test");
        let result = registry
            .execute_query("db1", "SELECT COUNT(*) AS n FROM users", &[])
            .await
            .unwrap();
        assert_eq!(result.rows[0]["n"], json!(5));
    }

    #[tokio::test]
    async fn test_save_failure_leaves_connection_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir).await;
        registry
            .execute_query("default", "DROP TABLE connections", &[])
            .await
            .unwrap();

        let err = registry
            .create_connection(Dialect::Sqlite, sample_config(&dir), "db1", "Test", true)
            .await;
        assert!(err.is_err());
        assert!(matches!(registry.state("db1"), Some(ConnectionState::Failed(_))));
        assert!(registry.driver("db1").is_err());
    }

    #[tokio::test]
    async fn test_saved_connections_are_restored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = registry(&dir).await;
            registry
                .create_connection(Dialect::Sqlite, sample_config(&dir), "db1", "Test", true)
                .await
                .unwrap();
            registry
                .create_connection(Dialect::Sqlite, sample_config(&dir), "db2", "Scratch", true)
                .await
                .unwrap();
            registry.drop_connection("db2").await.unwrap();
            registry.close_all().await;
        }

        let registry = registry(&dir).await;
        assert_eq!(registry.load_saved_connections().await.unwrap(), 1);

        let listed = registry.list();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["db1", "default"]);
        assert_eq!(listed[0].name, "Test");
        assert!(listed[0].is_connected);
    }

    #[tokio::test]
    async fn test_drop_connection_rules() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir).await;

        assert!(matches!(
            registry.drop_connection("default").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            registry.drop_connection("ghost").await,
            Err(Error::NotFound(_))
        ));
    }
}
