//! Span creation helpers for queries and schema changes

use crate::attributes::*;
use tracing::Span;

/// Attributes for tracing a query against a registered connection
#[derive(Debug, Clone)]
pub struct QuerySpanAttributes<'a> {
    pub connection_id: &'a str,
    pub dialect: &'a str,
    pub sql: &'a str,
}

/// Create a span for a query.
///
/// The operation attribute is the statement's leading keyword, lowercased.
/// The SQL text itself is only recorded at debug level by the callers.
pub fn query_span(attrs: QuerySpanAttributes<'_>) -> Span {
    tracing::info_span!(
        "db_query",
        { DB_SYSTEM } = %attrs.dialect,
        { DB_CONNECTION_ID } = %attrs.connection_id,
        { DB_OPERATION } = %statement_verb(attrs.sql),
    )
}

/// Create a span for a DDL operation run by the schema editor
pub fn schema_change_span(connection_id: &str, table: &str, operation: &str) -> Span {
    tracing::info_span!(
        "db_schema_change",
        { DB_SYSTEM } = "sqlite",
        { DB_CONNECTION_ID } = %connection_id,
        { DB_SQL_TABLE } = %table,
        { DB_OPERATION } = %operation,
    )
}

/// Leading keyword of a statement, lowercased (`select`, `insert`, ...)
pub fn statement_verb(sql: &str) -> String {
    sql.trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_verb() {
        assert_eq!(statement_verb("  SELECT * FROM users"), "select");
        assert_eq!(statement_verb("insert into t values (1)"), "insert");
        assert_eq!(statement_verb("PRAGMA table_info(users)"), "pragma");
        assert_eq!(statement_verb(""), "");
    }

    #[test]
    fn test_query_span_attributes() {
        let span = query_span(QuerySpanAttributes {
            connection_id: "db1",
            dialect: "sqlite",
            sql: "select 1",
        });
        let _guard = span.enter();
    }
}
