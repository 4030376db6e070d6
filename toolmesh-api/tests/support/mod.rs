//! Shared test support: a fully wired app over in-memory stores.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::Arc;
use toolmesh_api::{
    api_router, ApiConfig, AppState, AuthGate, CoreServices, FixedClock, JwtSecret, RateLimitConfig,
    WebhookConfig,
};
use toolmesh_test_utils::MockAdapter;
use tower::ServiceExt;

pub const TEST_API_KEY: &str = "test-key-123";
pub const GITHUB_SECRET: &str = "s";
pub const AGENT_SECRET: &str = "agent-secret";

/// Build an app with one mock adapter (`mock`), a GitHub and an agent
/// webhook secret, and a generous rate limit.
pub async fn test_app() -> (Router, AppState) {
    test_app_with_rate_limit(RateLimitConfig {
        enabled: true,
        limit_per_second: 1000,
        burst: 1000,
        ..RateLimitConfig::default()
    })
    .await
}

pub async fn test_app_with_rate_limit(rate_limit: RateLimitConfig) -> (Router, AppState) {
    let mut config = ApiConfig::default();
    config.rate_limit = rate_limit;
    config.webhooks = WebhookConfig::new()
        .with_secret("github", GITHUB_SECRET)
        .with_secret("agent", AGENT_SECRET);

    let auth = AuthGate::new(JwtSecret::new("test-jwt-secret".to_string()).unwrap())
        .with_clock(Arc::new(FixedClock(1_700_000_000)));
    auth.api_keys().replace_keys(HashMap::from([(
        TEST_API_KEY.to_string(),
        "user-1".to_string(),
    )]));

    let services = CoreServices::in_memory(config, auth).unwrap();
    services
        .registry
        .register(MockAdapter::succeeding("mock"))
        .await;
    services
        .registry
        .register(MockAdapter::succeeding("github"))
        .await;
    let state = AppState::new(services);
    (api_router(state.clone()), state)
}

/// Build an authenticated JSON request.
pub fn authed(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TEST_API_KEY)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Build an authenticated request without a body.
pub fn authed_empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TEST_API_KEY)
        .body(Body::empty())
        .unwrap()
}

/// Fetch `/metrics` (authenticated) and return the text exposition body.
pub async fn metrics_text(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(authed_empty("GET", "/metrics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Fire a request and return status plus parsed JSON body (Null when empty).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}
