//! # dbstudio telemetry
//!
//! Tracing subscriber setup with an OpenTelemetry layer, plus span helpers for
//! database work. Span attributes follow the OpenTelemetry semantic
//! conventions for database clients.

mod spans;
mod tracer;

pub use spans::{QuerySpanAttributes, query_span, schema_change_span, statement_verb};
pub use tracer::{init_telemetry, tracer_provider};

/// OpenTelemetry span attribute constants for database observability.
pub mod attributes {
    pub const DB_SYSTEM: &str = "db.system";
    pub const DB_OPERATION: &str = "db.operation";
    pub const DB_SQL_TABLE: &str = "db.sql.table";
    pub const DB_CONNECTION_ID: &str = "db.connection_id";

    /// Tracer name registered with the provider
    pub const SERVICE_NAME: &str = "dbstudio";
}
