//! Configuration management for dbstudio
//!
//! Loads configuration with priority:
//! 1. Environment variables
//! 2. config.toml (or specified config file), with `${VAR}` references resolved
//! 3. Defaults
//!
//! The result is validated before the server boots.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum length for JWT signing secrets
pub const MIN_SECRET_LEN: usize = 32;

/// Environment variables holding optional cloud Postgres URLs, keyed by the
/// connection id they are registered under.
pub const CLOUD_URL_VARS: &[(&str, &str)] = &[
    ("neon", "NEON_DATABASE_URL"),
    ("supabase", "SUPABASE_DATABASE_URL"),
    ("railway", "RAILWAY_DATABASE_URL"),
    ("render", "RENDER_DATABASE_URL"),
    ("aws-rds", "AWS_RDS_DATABASE_URL"),
];

/// dbstudio configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(value: &str) -> anyhow::Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(anyhow!("Unknown environment '{}'", other)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origin; `*` allows any
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// Require a bearer token on the connection routes as well
    #[serde(default)]
    pub require_auth: bool,
}

/// System database and connection bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the system SQLite database
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Registry id of the system connection
    #[serde(default = "default_connection_id")]
    pub default_connection_id: String,

    /// Optional Postgres URL registered at boot as `primary`
    pub database_url: Option<String>,

    /// Optional cloud URLs registered at boot under their key
    #[serde(default)]
    pub cloud_urls: BTreeMap<String, String>,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default)]
    pub jwt_refresh_secret: String,

    /// Access token lifetime, e.g. `15m`, `1h`, `3600`
    #[serde(default = "default_jwt_expires_in")]
    pub jwt_expires_in: String,

    #[serde(default = "default_jwt_refresh_expires_in")]
    pub jwt_refresh_expires_in: String,

    #[serde(default = "default_bcrypt_rounds")]
    pub bcrypt_rounds: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,

    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    pub service_name: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            require_auth: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            default_connection_id: default_connection_id(),
            database_url: None,
            cloud_urls: BTreeMap::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_refresh_secret: String::new(),
            jwt_expires_in: default_jwt_expires_in(),
            jwt_refresh_expires_in: default_jwt_refresh_expires_in(),
            bcrypt_rounds: default_bcrypt_rounds(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: default_log_filter(),
            service_name: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from config.toml (if one is found) and the
    /// process environment, then validate it.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file, or search for config.toml
    /// when `path` is `None`. A missing config.toml is not an error.
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::find_config_file()?,
        };

        let mut config = match config_path {
            Some(config_path) => {
                tracing::debug!("Loading configuration from: {:?}", config_path);
                let contents = fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
                let mut config: AppConfig = toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
                config.resolve_env_vars();
                config
            }
            None => AppConfig::default(),
        };

        config.apply_env(|name| env::var(name).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Find config.toml by searching current directory and parents
    fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
        let mut current = env::current_dir()?;

        loop {
            let config_path = current.join("config.toml");
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if !current.pop() {
                return Ok(None);
            }
        }
    }

    /// Resolve ${VAR_NAME} references in string settings
    fn resolve_env_vars(&mut self) {
        let resolve = |value: &mut String| {
            if let Some(resolved) = Self::resolve_env_var(value) {
                *value = resolved;
            }
        };

        resolve(&mut self.auth.jwt_secret);
        resolve(&mut self.auth.jwt_refresh_secret);
        resolve(&mut self.database.sqlite_path);
        if let Some(ref mut url) = self.database.database_url {
            resolve(url);
        }
        for url in self.database.cloud_urls.values_mut() {
            resolve(url);
        }
    }

    /// Resolve a single ${VAR_NAME} reference
    fn resolve_env_var(value: &str) -> Option<String> {
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            env::var(var_name).ok()
        } else {
            Some(value.to_string())
        }
    }

    /// Apply environment variable overrides using `lookup` to read them.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("APP_ENV").or_else(|| lookup("NODE_ENV")) {
            self.environment = Environment::parse(&value)?;
        }
        if let Some(value) = lookup("HOST") {
            self.server.host = value;
        }
        if let Some(value) = lookup("PORT") {
            self.server.port = value
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{}'", value))?;
        }
        if let Some(value) = lookup("CORS_ORIGIN") {
            self.server.cors_origin = value;
        }
        if let Some(value) = lookup("REQUIRE_AUTH") {
            self.server.require_auth = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = lookup("SQLITE_PATH") {
            self.database.sqlite_path = value;
        }
        if let Some(value) = lookup("DEFAULT_CONNECTION_ID") {
            self.database.default_connection_id = value;
        }
        if let Some(value) = lookup("DATABASE_URL") {
            self.database.database_url = Some(value);
        }
        for (key, var) in CLOUD_URL_VARS {
            if let Some(value) = lookup(var) {
                self.database.cloud_urls.insert(key.to_string(), value);
            }
        }
        if let Some(value) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = value;
        }
        if let Some(value) = lookup("JWT_REFRESH_SECRET") {
            self.auth.jwt_refresh_secret = value;
        }
        if let Some(value) = lookup("JWT_EXPIRES_IN") {
            self.auth.jwt_expires_in = value;
        }
        if let Some(value) = lookup("JWT_REFRESH_EXPIRES_IN") {
            self.auth.jwt_refresh_expires_in = value;
        }
        if let Some(value) = lookup("BCRYPT_ROUNDS") {
            self.auth.bcrypt_rounds = value
                .parse()
                .with_context(|| format!("BCRYPT_ROUNDS must be a number, got '{}'", value))?;
        }
        if let Some(value) = lookup("LOG_FORMAT") {
            self.observability.log_format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }
        Ok(())
    }

    /// Check the settings the server cannot run without
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(crate::Error::config_error(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if self.auth.jwt_refresh_secret.len() < MIN_SECRET_LEN {
            return Err(crate::Error::config_error(format!(
                "JWT_REFRESH_SECRET must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if !(4..=31).contains(&self.auth.bcrypt_rounds) {
            return Err(crate::Error::config_error(
                "BCRYPT_ROUNDS must be between 4 and 31",
            ));
        }
        parse_duration(&self.auth.jwt_expires_in)?;
        parse_duration(&self.auth.jwt_refresh_expires_in)?;
        if self.database.sqlite_path.trim().is_empty() {
            return Err(crate::Error::config_error("SQLITE_PATH must not be empty"));
        }
        if self.database.default_connection_id.trim().is_empty() {
            return Err(crate::Error::config_error(
                "DEFAULT_CONNECTION_ID must not be empty",
            ));
        }
        Ok(())
    }

    pub fn access_token_ttl(&self) -> crate::Result<Duration> {
        parse_duration(&self.auth.jwt_expires_in)
    }

    pub fn refresh_token_ttl(&self) -> crate::Result<Duration> {
        parse_duration(&self.auth.jwt_refresh_expires_in)
    }

    /// Create test-friendly defaults
    pub fn test_defaults() -> Self {
        Self {
            environment: Environment::Test,
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig {
                jwt_secret: "test-access-secret-0123456789abcdef".to_string(),
                jwt_refresh_secret: "test-refresh-secret-0123456789abcdef".to_string(),
                bcrypt_rounds: 4,
                ..AuthConfig::default()
            },
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Parse a lifetime such as `30s`, `15m`, `12h`, `7d` or a bare number of seconds
pub fn parse_duration(value: &str) -> crate::Result<Duration> {
    let value = value.trim();
    let invalid = || crate::Error::config_error(format!("Invalid duration '{}'", value));

    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => return Err(invalid()),
    };
    let seconds = amount.checked_mul(multiplier).ok_or_else(invalid)?;

    Ok(Duration::from_secs(seconds))
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_sqlite_path() -> String {
    "sample.db".to_string()
}

fn default_connection_id() -> String {
    "default".to_string()
}

fn default_jwt_expires_in() -> String {
    "15m".to_string()
}

fn default_jwt_refresh_expires_in() -> String {
    "7d".to_string()
}

fn default_bcrypt_rounds() -> u32 {
    12
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database.sqlite_path, "sample.db");
        assert_eq!(config.database.default_connection_id, "default");
        assert_eq!(config.auth.bcrypt_rounds, 12);
    }

    #[test]
    fn test_test_defaults_validate() {
        assert!(AppConfig::test_defaults().validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup_from(&[
                ("PORT", "8088"),
                ("NODE_ENV", "production"),
                ("SQLITE_PATH", "/tmp/system.db"),
                ("NEON_DATABASE_URL", "postgres://u:p@ep-1.neon.tech/db"),
                ("BCRYPT_ROUNDS", "10"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.database.sqlite_path, "/tmp/system.db");
        assert_eq!(config.auth.bcrypt_rounds, 10);
        assert_eq!(
            config.database.cloud_urls.get("neon").map(String::as_str),
            Some("postgres://u:p@ep-1.neon.tech/db")
        );
    }

    #[test]
    fn test_app_env_wins_over_node_env() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup_from(&[("APP_ENV", "test"), ("NODE_ENV", "production")]))
            .unwrap();
        assert_eq!(config.environment, Environment::Test);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(lookup_from(&[("PORT", "http")])).is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = AppConfig::test_defaults();
        config.auth.jwt_secret = "too-short".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_bcrypt_rounds_range() {
        let mut config = AppConfig::test_defaults();
        config.auth.bcrypt_rounds = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("999999999999999999d").is_err());
        assert!(parse_duration("99999999999999999999").is_err());
    }

    #[test]
    fn test_resolve_env_var() {
        let not_var = AppConfig::resolve_env_var("plain_value");
        assert_eq!(not_var, Some("plain_value".to_string()));

        let missing = AppConfig::resolve_env_var("${DBSTUDIO_SURELY_UNSET_VAR}");
        assert_eq!(missing, None);
    }

    #[test]
    fn test_parse_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            environment = "production"

            [server]
            port = 9000
            require_auth = true

            [database]
            sqlite_path = "data/system.db"

            [database.cloud_urls]
            neon = "postgres://u:p@ep-1.neon.tech/db"
            "#,
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.server.port, 9000);
        assert!(config.server.require_auth);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.sqlite_path, "data/system.db");
        assert_eq!(config.database.cloud_urls.len(), 1);
    }
}
