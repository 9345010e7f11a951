//! Postgres row to JSON conversion, by column type name

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use dbs_core::iso_timestamp;
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use uuid::Uuid;

pub(crate) fn row_to_json(row: &PgRow) -> Map<String, JsonValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = match row.try_get_raw(idx) {
                Ok(raw) if raw.is_null() => JsonValue::Null,
                Ok(_) => decode_by_type(row, idx, column.type_info().name()),
                Err(_) => JsonValue::Null,
            };
            (column.name().to_string(), value)
        })
        .collect()
}

fn decode_by_type(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    match type_name {
        "BOOL" => get::<bool>(row, idx).map(JsonValue::Bool),
        "INT2" => get::<i16>(row, idx).map(JsonValue::from),
        "INT4" => get::<i32>(row, idx).map(JsonValue::from),
        "INT8" => get::<i64>(row, idx).map(JsonValue::from),
        "OID" => get::<sqlx::postgres::types::Oid>(row, idx).map(|oid| JsonValue::from(oid.0)),
        "FLOAT4" => get::<f32>(row, idx).and_then(|f| float(f as f64)),
        "FLOAT8" => get::<f64>(row, idx).and_then(float),
        // Kept as a string so no precision is lost
        "NUMERIC" => get::<Decimal>(row, idx).map(|d| JsonValue::String(d.to_string())),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            get::<String>(row, idx).map(JsonValue::String)
        }
        "BYTEA" => get::<Vec<u8>>(row, idx).map(|bytes| JsonValue::String(hex::encode(bytes))),
        "DATE" => get::<NaiveDate>(row, idx).map(|d| JsonValue::String(d.to_string())),
        "TIME" => get::<NaiveTime>(row, idx).map(|t| JsonValue::String(t.to_string())),
        "TIMESTAMP" => get::<NaiveDateTime>(row, idx)
            .map(|ts| JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())),
        "TIMESTAMPTZ" => {
            get::<DateTime<Utc>>(row, idx).map(|ts| JsonValue::String(iso_timestamp(&ts)))
        }
        "UUID" => get::<Uuid>(row, idx).map(|u| JsonValue::String(u.to_string())),
        "JSON" | "JSONB" => get::<JsonValue>(row, idx),
        "INT4[]" => get::<Vec<i32>>(row, idx).map(JsonValue::from),
        "INT8[]" => get::<Vec<i64>>(row, idx).map(JsonValue::from),
        "TEXT[]" | "VARCHAR[]" => get::<Vec<String>>(row, idx).map(JsonValue::from),
        "BOOL[]" => get::<Vec<bool>>(row, idx).map(JsonValue::from),
        "FLOAT8[]" => get::<Vec<f64>>(row, idx).map(JsonValue::from),
        _ => get::<String>(row, idx).map(JsonValue::String),
    }
    .unwrap_or(JsonValue::Null)
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(idx).ok()
}

fn float(f: f64) -> Option<JsonValue> {
    serde_json::Number::from_f64(f).map(JsonValue::Number)
}
