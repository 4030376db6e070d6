//! Axum middleware: request metrics, authentication, and rate limiting.
//!
//! Request flow on protected routes: metrics → auth → rate limit → handler.
//! The metrics middleware wraps every route (public ones included) so the
//! request counter also sees 401s and 429s produced by the inner layers. The
//! auth middleware injects an `AuthContext` into request extensions; the rate
//! limiter keys on the authenticated user id, falling back to the client IP
//! for anything that reached it unauthenticated.

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

// ============================================================================
// REQUEST METRICS
// ============================================================================

/// Count every response in the request counter, labeled by method and status.
pub async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    state
        .metrics
        .http_requests
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    response
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Authenticate the request and inject [`AuthContext`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|h| h.to_str().ok());
    let authorization = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    let auth_context = state.auth.authenticate(api_key, authorization)?;
    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Extract the client IP, honoring proxy headers before the socket address.
fn extract_client_ip(request: &Request, fallback: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(forwarded_for) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first) = forwarded_for.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }
    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
    {
        if let Ok(ip) = real_ip.trim().parse() {
            return Some(ip);
        }
    }
    fallback.map(|addr| addr.ip())
}

/// Enforce the per-client token bucket. 429 with a `Retry-After` hint on
/// rejection.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (key, kind) = match request.extensions().get::<AuthContext>() {
        Some(auth) => (format!("user:{}", auth.user_id), "user"),
        None => {
            let ip = extract_client_ip(&request, connect_info.map(|c| c.0))
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            (format!("ip:{ip}"), "ip")
        }
    };

    match state.limiter.check(&key) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after) => {
            state.metrics.rate_limited.with_label_values(&[kind]).inc();
            Err(ApiError::rate_limited(retry_after))
        }
    }
}
