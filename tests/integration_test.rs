// Integration tests for dbstudio
// These drive the full router over a temporary system database

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use dbs_core::AppConfig;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

fn config(dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::test_defaults();
    config.database.sqlite_path = dir.path().join("sample.db").to_string_lossy().into_owned();
    config
}

async fn app(config: AppConfig) -> Router {
    let state = dbstudio::bootstrap(config).await.unwrap();
    dbs_server::create_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_e2e_register_sqlite_and_browse() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let path = config.database.sqlite_path.clone();
    let app = app(config).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/connections",
        Some(json!({ "type": "sqlite", "config": { "path": path }, "name": "Test", "id": "db1" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], json!("db1"));

    let (status, body) = send(&app, "GET", "/api/connections/db1/tables", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for table in ["connections", "users", "products", "orders"] {
        assert!(names.contains(&table), "missing table {}", table);
    }

    let (status, body) = send(
        &app,
        "POST",
        "/api/connections/db1/query",
        Some(json!({ "query": "SELECT * FROM users WHERE id = ?", "values": [1] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("John Doe"));
    assert!(body["data"]["executedAt"].is_string());

    let (status, body) = send(
        &app,
        "POST",
        "/api/connections/db1/query",
        Some(json!({ "query": "UPDATE products SET stock = stock - 1 WHERE id = ?", "values": [2] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rowsAffected"], json!(1));
}

#[tokio::test]
async fn test_e2e_schema_editing() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(config(&dir)).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/connections/default/schema/tables/users/columns",
        Some(json!({ "column": { "name": "nickname", "type": "TEXT" } })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = send(&app, "GET", "/api/connections/default/schema/tables/users", None, None).await;
    assert_eq!(body["data"]["columns"].as_array().unwrap().len(), 9);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/connections/default/schema/tables/users/columns/nickname",
        Some(json!({ "column": { "name": "handle", "type": "VARCHAR(40)", "nullable": true } })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app,
        "POST",
        "/api/connections/default/query",
        Some(json!({ "query": "SELECT COUNT(*) AS n FROM users" })),
        None,
    )
    .await;
    assert_eq!(body["data"]["rows"][0]["n"], json!(5));

    let (status, body) = send(
        &app,
        "DELETE",
        "/api/connections/default/schema/tables/users/columns/missing",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));

    let (status, _) = send(
        &app,
        "DELETE",
        "/api/connections/default/schema/tables/users/columns/handle",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/api/connections/default/schema/tables",
        Some(json!({ "name": "notes", "columns": [{ "name": "only", "type": "TEXT" }] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // A table cannot lose its last column
    let (status, _) = send(
        &app,
        "DELETE",
        "/api/connections/default/schema/tables/notes/columns/only",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/connections/default/schema/tables/notes",
        Some(json!({ "newName": "memos" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "DELETE", "/api/connections/default/schema/tables/memos", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_e2e_auth_flow() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(config(&dir)).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/register",
        Some(json!({ "name": "Ann", "email": "ann@example.com", "password": "correct horse" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["user"].get("passwordHash").is_none());

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "ann@example.com", "password": "correct horse" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["data"]["tokens"]["accessToken"].as_str().unwrap().to_string();
    let refresh = body["data"]["tokens"]["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "GET", "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = send(&app, "GET", "/api/auth/me", None, Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], json!("ann@example.com"));

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/refresh",
        Some(json!({ "refreshToken": refresh })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["data"]["accessToken"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "POST", "/api/auth/logout", None, Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api/auth/me", None, Some(&access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "ann@example.com", "password": "wrong password" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_e2e_password_reset() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(config(&dir)).await;

    send(
        &app,
        "POST",
        "/api/auth/register",
        Some(json!({ "name": "Bo", "email": "bo@example.com", "password": "first password" })),
        None,
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/reset-password",
        Some(json!({ "email": "bo@example.com" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["resetToken"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        "POST",
        "/api/auth/reset-password",
        Some(json!({ "email": "nobody@example.com" })),
        None,
    )
    .await;
    assert!(body.get("resetToken").is_none());

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/reset-password-confirm",
        Some(json!({ "token": token, "password": "second password" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "bo@example.com", "password": "second password" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_e2e_connection_test_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(config(&dir)).await;
    let missing = dir.path().join("missing.db").to_string_lossy().into_owned();

    for _ in 0..2 {
        let (status, body) = send(
            &app,
            "POST",
            "/api/connections/test",
            Some(json!({ "type": "sqlite", "config": { "path": missing } })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
    }

    let (status, body) = send(
        &app,
        "POST",
        "/api/connections",
        Some(json!({ "type": "postgres", "config": { "url": "libsql://db.turso.io" }, "name": "Turso" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let (status, _) = send(
        &app,
        "POST",
        "/api/connections",
        Some(json!({ "type": "sqlite", "config": { "path": missing }, "name": "Missing" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = send(&app, "GET", "/api/connections/nope/tables", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_e2e_connections_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = config(&dir).database.sqlite_path;

    {
        let app = app(config(&dir)).await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/connections",
            Some(json!({ "type": "sqlite", "config": { "url": format!("sqlite://{}", path) }, "name": "Saved", "id": "saved" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let mut config = config(&dir);
    config.database.database_url = Some(format!("sqlite://{}", path));
    let app = app(config).await;

    let (_, body) = send(&app, "GET", "/api/connections", None, None).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["default", "primary", "saved"]);

    let (status, _) = send(&app, "DELETE", "/api/connections/saved", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "DELETE", "/api/connections/default", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
