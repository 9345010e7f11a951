//! Core types for dbstudio
//!
//! This crate provides the error taxonomy, configuration and the data model
//! shared by the drivers, the registry and the HTTP layer.

pub mod config;
pub mod error;
pub mod types;
pub mod value;

// Re-exports
pub use config::{AppConfig, AuthConfig, DatabaseConfig, Environment, LogFormat, ServerConfig};
pub use error::{Error, Result};
pub use types::{
    ColumnSpec, ConnectionConfig, DefaultValue, Dialect, PostgresConfig, QueryResult,
    SqliteConfig, SslConfig, SslMode, TableInfo, TableSchema,
};
pub use value::{SqlValue, iso_timestamp, quote_ident, quote_literal, quote_name};
