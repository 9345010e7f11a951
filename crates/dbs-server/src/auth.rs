//! Account endpoints

use crate::error::{ApiError, ApiJson};
use crate::rest::AppState;
use crate::types::{LogoutRequest, RefreshRequest, ResetPasswordConfirmRequest, ResetPasswordRequest};
use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
};
use dbs_auth::{Claims, LoginRequest, RegisterRequest};
use dbs_core::Environment;
use serde_json::{Value as JsonValue, json};

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let session = state.auth.register(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": session })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let session = state.auth.login(req).await?;
    Ok(Json(json!({ "success": true, "data": session })))
}

pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let tokens = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(json!({ "success": true, "data": tokens })))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<LogoutRequest>>,
) -> Json<JsonValue> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    state.auth.logout(&claims, req.refresh_token.as_deref());
    Json(json!({ "success": true, "message": "Logged out" }))
}

/// Always answers the same way so callers cannot discover accounts.
/// Outside production the token is included for local testing.
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let token = state.auth.reset_password(&req.email).await?;

    let mut body = json!({
        "success": true,
        "message": "If the account exists, a password reset has been issued",
    });
    if state.config.environment != Environment::Production {
        if let Some(token) = token {
            body["resetToken"] = JsonValue::String(token);
        }
    }
    Ok(Json(body))
}

pub async fn reset_password_confirm(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordConfirmRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    state
        .auth
        .reset_password_confirm(&req.token, &req.password)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Password updated" })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<JsonValue>, ApiError> {
    let user = state.auth.me(&claims).await?;
    Ok(Json(json!({ "success": true, "data": user })))
}
