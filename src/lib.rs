//! dbstudio application wiring
//!
//! Builds the shared [`AppState`] from a validated [`AppConfig`]: the system
//! database, saved connections, connections named by environment URLs, and
//! the account service.

use anyhow::Context;
use dbs_auth::AuthService;
use dbs_core::{AppConfig, ConnectionConfig, DatabaseConfig};
use dbs_registry::ConnectionRegistry;
use dbs_server::AppState;
use std::sync::Arc;

/// Registry id for `DATABASE_URL`
pub const PRIMARY_CONNECTION_ID: &str = "primary";

/// Open everything the HTTP API needs
pub async fn bootstrap(config: AppConfig) -> anyhow::Result<AppState> {
    let registry = Arc::new(ConnectionRegistry::new(
        config.database.sqlite_path.clone(),
        config.database.default_connection_id.clone(),
    ));

    let system = registry
        .setup_default_connection()
        .await
        .with_context(|| format!("Failed to open system database {}", config.database.sqlite_path))?;

    let restored = registry
        .load_saved_connections()
        .await
        .context("Failed to read saved connections")?;
    let from_env = register_env_connections(&registry, &config.database).await;
    tracing::info!(restored, from_env, "Connections registered");

    let auth = AuthService::new(system, &config)
        .await
        .context("Failed to initialize auth service")?;

    Ok(AppState {
        registry,
        auth: Arc::new(auth),
        config: Arc::new(config),
    })
}

/// Register `DATABASE_URL` and the cloud URLs. Failures are logged and skipped.
pub async fn register_env_connections(registry: &ConnectionRegistry, database: &DatabaseConfig) -> usize {
    let mut urls: Vec<(&str, &str)> = Vec::new();
    if let Some(url) = database.database_url.as_deref() {
        urls.push((PRIMARY_CONNECTION_ID, url));
    }
    for (id, url) in &database.cloud_urls {
        urls.push((id.as_str(), url.as_str()));
    }

    let mut registered = 0;
    for (id, url) in urls {
        let config = match dbs_drivers::parse_connection_url(url) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Skipping unparseable connection URL");
                continue;
            }
        };
        let Some(dialect) = config.dialect() else {
            continue;
        };

        match registry
            .create_connection(dialect, config, id, id, false)
            .await
        {
            Ok(()) => registered += 1,
            Err(e) => tracing::warn!(connection_id = %id, error = %e, "Failed to register connection from environment"),
        }
    }
    registered
}

/// Human-readable breakdown of a connection URL, as the server would use it
pub fn describe_url(url: &str) -> dbs_core::Result<String> {
    let lines = match dbs_drivers::parse_connection_url(url)? {
        ConnectionConfig::Sqlite(sqlite) => vec![
            "dialect:  sqlite".to_string(),
            format!("path:     {}", sqlite.path),
        ],
        ConnectionConfig::Postgres(pg) => {
            let provider = dbs_drivers::detect_provider(&pg.host)
                .map(|p| p.name())
                .unwrap_or("generic");
            let resolved = dbs_drivers::resolve_cloud_config(pg);
            let ssl = match resolved.ssl {
                Some(ssl) => format!("{:?} (reject unauthorized: {})", ssl.mode, ssl.reject_unauthorized),
                None => "default".to_string(),
            };
            vec![
                "dialect:  postgres".to_string(),
                format!("host:     {}:{}", resolved.host, resolved.port),
                format!("database: {}", resolved.database),
                format!("user:     {}", resolved.user),
                format!("provider: {}", provider),
                format!("ssl:      {}", ssl),
                format!(
                    "pool:     max {}, connect timeout {}ms, idle timeout {}ms",
                    resolved.pool_max.unwrap_or_default(),
                    resolved.connection_timeout_ms.unwrap_or_default(),
                    resolved.idle_timeout_ms.unwrap_or_default()
                ),
            ]
        }
        ConnectionConfig::Url(raw) => vec![format!("unresolved: {}", raw)],
    };
    Ok(lines.join("\n"))
}
