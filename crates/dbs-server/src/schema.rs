//! SQLite schema editing endpoints

use crate::error::{ApiError, ApiJson};
use crate::rest::AppState;
use crate::types::{ColumnRequest, CreateTableRequest, RenameTableRequest};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use dbs_core::{Error, TableSchema};
use dbs_telemetry::schema_change_span;
use serde_json::{Value as JsonValue, json};
use tracing::Instrument;

fn done(message: impl Into<String>) -> Json<JsonValue> {
    Json(json!({ "success": true, "message": message.into() }))
}

pub async fn describe_table(
    Path((id, table)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<JsonValue>, ApiError> {
    let schema = state.registry.describe_table(&id, &table).await?;
    Ok(Json(json!({ "success": true, "data": schema })))
}

pub async fn create_table(
    Path(id): Path<String>,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateTableRequest>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(Error::validation("Table name is required").into());
    }
    if req.columns.is_empty() {
        return Err(Error::validation("At least one column is required").into());
    }

    let editor = state.registry.schema_editor(&id)?;
    let schema = TableSchema::new(req.name, req.columns);
    editor
        .create_table(&schema)
        .instrument(schema_change_span(&id, &schema.name, "create_table"))
        .await?;

    Ok((
        StatusCode::CREATED,
        done(format!("Table '{}' created", schema.name)),
    ))
}

pub async fn rename_table(
    Path((id, table)): Path<(String, String)>,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RenameTableRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let editor = state.registry.schema_editor(&id)?;
    editor
        .rename_table(&table, &req.new_name)
        .instrument(schema_change_span(&id, &table, "rename_table"))
        .await?;
    Ok(done(format!("Table '{}' renamed to '{}'", table, req.new_name)))
}

pub async fn drop_table(
    Path((id, table)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<JsonValue>, ApiError> {
    let editor = state.registry.schema_editor(&id)?;
    editor
        .drop_table(&table)
        .instrument(schema_change_span(&id, &table, "drop_table"))
        .await?;
    Ok(done(format!("Table '{}' dropped", table)))
}

pub async fn add_column(
    Path((id, table)): Path<(String, String)>,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ColumnRequest>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let editor = state.registry.schema_editor(&id)?;
    editor
        .add_column(&table, &req.column)
        .instrument(schema_change_span(&id, &table, "add_column"))
        .await?;
    Ok((
        StatusCode::CREATED,
        done(format!("Column '{}' added", req.column.name)),
    ))
}

pub async fn modify_column(
    Path((id, table, column)): Path<(String, String, String)>,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ColumnRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let editor = state.registry.schema_editor(&id)?;
    editor
        .modify_column(&table, &column, req.column)
        .instrument(schema_change_span(&id, &table, "modify_column"))
        .await?;
    Ok(done(format!("Column '{}' modified", column)))
}

pub async fn drop_column(
    Path((id, table, column)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Json<JsonValue>, ApiError> {
    let editor = state.registry.schema_editor(&id)?;
    editor
        .drop_column(&table, &column)
        .instrument(schema_change_span(&id, &table, "drop_column"))
        .await?;
    Ok(done(format!("Column '{}' dropped", column)))
}
