//! SQLite row to JSON conversion
//!
//! SQLite types values dynamically, so decoding goes by the storage class of
//! each value. The declared column type is only consulted to turn `BOOLEAN`
//! columns (stored as 0/1) back into booleans.

use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

pub(crate) fn row_to_json(row: &SqliteRow) -> Map<String, JsonValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let declared = column.type_info().name().to_ascii_uppercase();
            (column.name().to_string(), decode_value(row, idx, &declared))
        })
        .collect()
}

fn decode_value(row: &SqliteRow, idx: usize, declared: &str) -> JsonValue {
    let storage = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return JsonValue::Null,
        Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
        Err(_) => return JsonValue::Null,
    };

    match storage.as_str() {
        "INTEGER" | "BOOLEAN" => match row.try_get_unchecked::<i64, _>(idx) {
            Ok(v) if is_boolean(declared) => JsonValue::Bool(v != 0),
            Ok(v) => JsonValue::from(v),
            Err(_) => JsonValue::Null,
        },
        "REAL" => row
            .try_get_unchecked::<f64, _>(idx)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .map(|bytes| JsonValue::String(hex::encode(bytes)))
            .unwrap_or(JsonValue::Null),
        _ => row
            .try_get_unchecked::<String, _>(idx)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    }
}

fn is_boolean(declared: &str) -> bool {
    matches!(declared, "BOOLEAN" | "BOOL")
}
