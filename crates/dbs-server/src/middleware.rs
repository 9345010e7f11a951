use crate::error::ApiError;
use crate::rest::AppState;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use dbs_core::Error;

/// Reject requests without a valid bearer access token.
///
/// The verified claims are stored in the request extensions for handlers
/// that take `Extension<Claims>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::auth_error("Missing bearer token"))?;

    let claims = state.auth.verify_access_token(token)?;
    tracing::debug!(user_id = %claims.sub, path = %request.uri().path(), "Authenticated request");
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
