#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use idempotent_orders::api::{create_router, AppState};
use idempotent_orders::app::build_state;
use idempotent_orders::config::Settings;
use idempotent_orders::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use std::sync::Arc;
use tower::ServiceExt;

pub const TOKEN_A: &str = "token-a";
pub const TOKEN_B: &str = "token-b";

pub const TEST_SETTINGS: &str = r#"
    [application]
    host = "127.0.0.1"
    port = 0
    log_level = "debug"

    [idempotency]
    header_name = "Idempotency-Key"
    ttl_hours = 24
    reservation_ttl_seconds = 30
    capturable_status_codes = [200, 201]
    methods = ["POST", "PUT"]
    max_key_length = 64
    max_body_bytes = 4096
    sweep_interval_seconds = 0

    [[idempotency.routes]]
    method = "POST"
    path = "/api/orders"

    [[idempotency.routes]]
    method = "POST"
    path = "/api/products"

    [[idempotency.routes]]
    method = "PUT"
    path = "/api/products/:id"
    ttl_hours = 1

    [store]
    backend = "memory"
    key_prefix = "test"

    [auth.tokens]
    token-a = "A"
    token-b = "B"
"#;

pub fn test_settings() -> Settings {
    Settings::from_toml(TEST_SETTINGS).unwrap()
}

/// Router over a fresh in-memory store and the sample catalog.
pub fn test_app() -> (Router, AppState) {
    test_app_with_store(Arc::new(InMemoryIdempotencyStore::new()))
}

pub fn test_app_with_store(store: Arc<dyn IdempotencyStore>) -> (Router, AppState) {
    let state = build_state(&test_settings(), store, true).unwrap();
    (create_router(state.clone()), state)
}

pub fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    idempotency_key: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if let Some(key) = idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn order_body(product_id: i64, quantity: i32, status: &str) -> serde_json::Value {
    serde_json::json!({ "productId": product_id, "quantity": quantity, "status": status })
}
