use crate::error::{ApiError, ApiJson};
use crate::middleware::require_auth;
use crate::types::*;
use crate::{auth, schema};
use axum::{
    Router,
    extract::{Json, Path, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use dbs_auth::AuthService;
use dbs_core::{AppConfig, ConnectionConfig, Error, SqlValue};
use dbs_registry::ConnectionRegistry;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub auth: Arc<AuthService>,
    pub config: Arc<AppConfig>,
}

pub fn create_router(state: AppState) -> Router {
    let mut connections = Router::new()
        .route("/api/connections", get(list_connections).post(create_connection))
        .route("/api/connections/test", post(test_connection))
        .route("/api/connections/:id", delete(delete_connection))
        .route("/api/connections/:id/query", post(run_query))
        .route("/api/connections/:id/tables", get(list_tables))
        .route("/api/connections/:id/schema/tables", post(schema::create_table))
        .route(
            "/api/connections/:id/schema/tables/:table",
            get(schema::describe_table)
                .put(schema::rename_table)
                .delete(schema::drop_table),
        )
        .route(
            "/api/connections/:id/schema/tables/:table/columns",
            post(schema::add_column),
        )
        .route(
            "/api/connections/:id/schema/tables/:table/columns/:column",
            put(schema::modify_column).delete(schema::drop_column),
        );
    if state.config.server.require_auth {
        connections =
            connections.route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
    }

    let protected_auth = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/logout", post(auth::logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_auth = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route(
            "/api/auth/reset-password-confirm",
            post(auth::reset_password_confirm),
        );

    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        // Health check endpoints
        .route("/health", get(health_check))
        .route("/readiness", get(readiness_check))
        .merge(connections)
        .merge(protected_auth)
        .merge(public_auth)
        // Middleware layers (applied in reverse order)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}

/// `*` allows any origin; otherwise a comma-separated origin list
fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin.trim() == "*" {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origin
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn health_check() -> impl IntoResponse {
    tracing::debug!("Health check requested");
    (StatusCode::OK, "OK")
}

/// Ready once the system database answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ready = match state.registry.system_driver() {
        Ok(driver) => driver.test_connection().await.is_ok(),
        Err(_) => false,
    };

    if ready {
        (StatusCode::OK, "READY")
    } else {
        tracing::warn!("Readiness check failed: system database unavailable");
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn list_connections(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({ "success": true, "data": state.registry.list() }))
}

async fn test_connection(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TestConnectionRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let config = ConnectionConfig::from_request(req.dialect, req.config)?;
    let result = state.registry.test_connection(req.dialect, &config).await;
    Ok(Json(serde_json::to_value(result).map_err(Error::from)?))
}

async fn create_connection(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(Error::validation("Connection name is required").into());
    }
    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if id == state.registry.system_id() {
        return Err(Error::validation("That id is reserved for the system connection").into());
    }

    let config = ConnectionConfig::from_request(req.dialect, req.config)?;
    state
        .registry
        .create_connection(req.dialect, config, &id, name, true)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "id": id,
            "message": "Connection created successfully",
        })),
    ))
}

async fn delete_connection(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JsonValue>, ApiError> {
    state.registry.drop_connection(&id).await?;
    Ok(Json(json!({ "success": true, "message": "Connection removed" })))
}

async fn run_query(
    Path(id): Path<String>,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<QueryRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(Error::validation("Query is required").into());
    }
    let values: Vec<SqlValue> = req.values.into_iter().map(SqlValue::from).collect();

    let result = state.registry.execute_query(&id, &req.query, &values).await?;
    Ok(Json(json!({
        "success": true,
        "data": QueryResponseData::new(result, req.query),
    })))
}

async fn list_tables(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JsonValue>, ApiError> {
    let tables = state.registry.get_tables(&id).await?;
    Ok(Json(json!({ "success": true, "data": tables })))
}
