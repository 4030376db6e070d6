//! Toolmesh API Server Entry Point
//!
//! Bootstraps configuration, wires the core services, and runs the Axum
//! server until a shutdown signal arrives. Teardown is explicit: background
//! tasks stop first, then components close in reverse dependency order.

use std::collections::HashMap;
use std::net::SocketAddr;

use toolmesh_api::{
    api_router, init_tracing, ApiConfig, ApiError, ApiResult, AppState, AuthGate, CoreServices,
    JwtSecret,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing();

    let config = ApiConfig::from_env();
    let auth = build_auth_gate()?;

    let services = CoreServices::in_memory(config.clone(), auth)?;
    services.start();
    let state = AppState::new(services);

    let app = api_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ApiError::internal(format!("Invalid bind address: {e}")))?;
    tracing::info!(%addr, "Starting Toolmesh API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to bind {addr}: {e}")))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal(format!("Server error: {e}")))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    state.shutdown().await;
    Ok(())
}

/// Build the auth gate from the environment:
/// - `TOOLMESH_JWT_SECRET`: bearer-token secret (required)
/// - `TOOLMESH_API_KEYS`: comma-separated `key:user_id` pairs
fn build_auth_gate() -> ApiResult<AuthGate> {
    let secret = std::env::var("TOOLMESH_JWT_SECRET")
        .map_err(|_| ApiError::internal("TOOLMESH_JWT_SECRET must be set"))?;
    let gate = AuthGate::new(JwtSecret::new(secret)?);

    if let Ok(raw) = std::env::var("TOOLMESH_API_KEYS") {
        let mut keys = HashMap::new();
        for pair in raw.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once(':') {
                Some((key, user_id)) if !key.is_empty() && !user_id.is_empty() => {
                    keys.insert(key.to_string(), user_id.to_string());
                }
                _ => {
                    tracing::warn!("Ignoring malformed TOOLMESH_API_KEYS entry");
                }
            }
        }
        tracing::info!(count = keys.len(), "Loaded API keys");
        gate.api_keys().replace_keys(keys);
    }

    Ok(gate)
}
