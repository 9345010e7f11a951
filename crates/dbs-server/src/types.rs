use dbs_core::{ColumnSpec, Dialect, QueryResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, Deserialize)]
pub struct TestConnectionRequest {
    #[serde(rename = "type")]
    pub dialect: Dialect,
    pub config: JsonValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConnectionRequest {
    #[serde(rename = "type")]
    pub dialect: Dialect,
    pub config: JsonValue,
    pub name: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub values: Vec<JsonValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponseData {
    pub rows: Vec<Map<String, JsonValue>>,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub executed_at: String,
    pub query: String,
}

impl QueryResponseData {
    pub fn new(result: QueryResult, query: String) -> Self {
        Self {
            rows: result.rows,
            columns: result.columns,
            rows_affected: result.rows_affected,
            executed_at: chrono::Utc::now().to_rfc3339(),
            query,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTableRequest {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameTableRequest {
    #[serde(rename = "newName", alias = "new_name")]
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnRequest {
    pub column: ColumnSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordConfirmRequest {
    pub token: String,
    #[serde(alias = "newPassword")]
    pub password: String,
}
