//! Persistence of registered connections in the system database

use chrono::Utc;
use dbs_core::{ConnectionConfig, Dialect, Result, SqlValue};
use dbs_drivers::Driver;
use dbs_orm::{Condition, Record, Repository, Values};
use std::sync::Arc;

/// A saved connection read back from the `connections` table
#[derive(Debug, Clone, PartialEq)]
pub struct SavedConnection {
    pub id: String,
    pub name: String,
    pub dialect: Dialect,
    pub config: ConnectionConfig,
}

/// The `connections` table of the system database
#[derive(Debug, Clone)]
pub struct SystemStore {
    connections: Repository,
}

impl SystemStore {
    /// Run the system migrations and bind to the `connections` table
    pub async fn open(driver: Arc<dyn Driver>) -> Result<Self> {
        crate::migrations::run_system_migrations(driver.as_ref()).await?;
        Ok(Self {
            connections: Repository::load(driver, "connections").await?,
        })
    }

    /// Insert or replace the saved row for `id` and mark it active
    pub async fn upsert(&self, id: &str, name: &str, dialect: Dialect, config: &ConnectionConfig) -> Result<()> {
        let now = SqlValue::Timestamp(Utc::now());
        let mut values: Values = vec![
            ("name".into(), name.into()),
            ("type".into(), dialect.as_str().into()),
            ("config".into(), serde_json::to_string(config)?.into()),
            ("is_active".into(), SqlValue::Bool(true)),
            ("updated_at".into(), now.clone()),
        ];

        if self.connections.exists(&[Condition::eq("id", id)]).await? {
            self.connections.update_by_id(id, &values).await?;
        } else {
            values.push(("id".into(), id.into()));
            values.push(("created_at".into(), now));
            self.connections.insert(&values).await?;
        }

        tracing::debug!(connection_id = %id, "Saved connection");
        Ok(())
    }

    /// Rows with `is_active = 1`; unreadable rows are logged and skipped
    pub async fn active_connections(&self) -> Result<Vec<SavedConnection>> {
        let rows = self
            .connections
            .find_many(vec![Condition::eq("is_active", true)])
            .await?;

        Ok(rows.iter().filter_map(|row| match decode(row) {
            Ok(saved) => Some(saved),
            Err(e) => {
                tracing::warn!(row = ?row.get("id"), error = %e, "Skipping unreadable saved connection");
                None
            }
        }).collect())
    }

    /// Mark the saved row inactive; returns whether a row matched
    pub async fn deactivate(&self, id: &str) -> Result<bool> {
        let values: Values = vec![
            ("is_active".into(), SqlValue::Bool(false)),
            ("updated_at".into(), SqlValue::Timestamp(Utc::now())),
        ];
        Ok(self.connections.update_by_id(id, &values).await? > 0)
    }
}

fn decode(row: &Record) -> Result<SavedConnection> {
    let text = |key: &str| {
        row.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| dbs_core::Error::validation(format!("missing '{}'", key)))
    };

    Ok(SavedConnection {
        id: text("id")?,
        name: text("name")?,
        dialect: text("type")?.parse()?,
        config: serde_json::from_str(&text("config")?)?,
    })
}
