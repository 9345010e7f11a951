//! SQL values and identifier/literal rendering

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A value that can be bound to a statement placeholder.
///
/// Built from JSON request bodies or from Rust values; `List` only appears on
/// the right-hand side of `IN` / `NOT IN` conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<SqlValue>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render as an inline SQL literal.
    ///
    /// Only used where a value cannot be bound, such as a column `DEFAULT`
    /// clause in DDL. Queries always bind values instead.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) if f.is_finite() => f.to_string(),
            SqlValue::Float(_) => "NULL".to_string(),
            SqlValue::Text(s) => quote_literal(s),
            SqlValue::Timestamp(ts) => quote_literal(&iso_timestamp(ts)),
            SqlValue::List(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.to_sql_literal()).collect();
                format!("({})", rendered.join(", "))
            }
        }
    }
}

/// ISO-8601 rendering used for timestamps everywhere in the workspace.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote an identifier, doubling embedded double quotes.
///
/// A dotted name (`orders.user_id`) is quoted part by part.
pub fn quote_ident(name: &str) -> String {
    name.split('.').map(quote_name).collect::<Vec<_>>().join(".")
}

/// Quote a single identifier as-is; dots stay part of the name
pub fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => SqlValue::Text(s),
            JsonValue::Array(items) => SqlValue::List(items.into_iter().map(Into::into).collect()),
            obj @ JsonValue::Object(_) => SqlValue::Text(obj.to_string()),
        }
    }
}

impl From<SqlValue> for JsonValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(b),
            SqlValue::Int(i) => JsonValue::from(i),
            SqlValue::Float(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Text(s) => JsonValue::String(s),
            SqlValue::Timestamp(ts) => JsonValue::String(iso_timestamp(&ts)),
            SqlValue::List(items) => JsonValue::Array(items.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<i32> for SqlValue {
    fn from(i: i32) -> Self {
        SqlValue::Int(i as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Float(f)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(ts: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(ts)
    }
}

impl<T: Into<SqlValue>> From<Vec<T>> for SqlValue {
    fn from(items: Vec<T>) -> Self {
        SqlValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_literal_escaping() {
        assert_eq!(SqlValue::from("O'Brien").to_sql_literal(), "'O''Brien'");
        assert_eq!(SqlValue::Bool(true).to_sql_literal(), "TRUE");
        assert_eq!(SqlValue::Bool(false).to_sql_literal(), "FALSE");
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
        assert_eq!(
            SqlValue::from(vec![1i64, 2, 3]).to_sql_literal(),
            "(1, 2, 3)"
        );
    }

    #[test]
    fn test_timestamp_literal_is_iso() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).to_sql_literal(),
            "'2024-01-02T03:04:05.000Z'"
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("orders.user_id"), "\"orders\".\"user_id\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_name("v1.2 archive"), "\"v1.2 archive\"");
    }

    #[test]
    fn test_from_json() {
        let v: SqlValue = serde_json::from_str(r#"[1, "a", null, true, 1.5]"#).unwrap();
        assert_eq!(
            v,
            SqlValue::List(vec![
                SqlValue::Int(1),
                SqlValue::Text("a".into()),
                SqlValue::Null,
                SqlValue::Bool(true),
                SqlValue::Float(1.5),
            ])
        );
    }
}
