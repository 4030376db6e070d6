//! REST API route assembly.
//!
//! Two surfaces share one `AppState`:
//! - `/api/v1/*` and `/metrics`: authenticated, then rate limited
//! - `/health` and `/webhook/*`: unauthenticated routes; webhook content is
//!   authenticated by its HMAC secret instead

pub mod context;
pub mod health;
pub mod tool;
pub mod vector;
pub mod webhook;

use crate::middleware::{auth_middleware, metrics_middleware, rate_limit_middleware};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the full application router.
pub fn api_router(state: AppState) -> Router {
    let v1 = Router::new()
        // Contexts
        .route("/contexts", post(context::create_context))
        .route("/contexts", get(context::list_contexts))
        .route("/contexts/:id", get(context::get_context))
        .route("/contexts/:id", put(context::update_context))
        .route("/contexts/:id", patch(context::patch_context))
        .route("/contexts/:id", delete(context::delete_context))
        .route("/contexts/:id/items", get(context::get_items))
        .route("/contexts/:id/items", post(context::append_items))
        .route("/contexts/:id/search", post(context::search_in_context))
        .route("/contexts/:id/summary", get(context::get_summary))
        // Vectors
        .route("/vectors/store", post(vector::store_vector))
        .route("/vectors/search", post(vector::search_vectors))
        .route("/vectors/context/:id", get(vector::get_context_vectors))
        .route("/vectors/context/:id", delete(vector::delete_context_vectors))
        .route(
            "/vectors/context/:id/model/:model_id",
            get(vector::get_model_vectors),
        )
        .route(
            "/vectors/context/:id/model/:model_id",
            delete(vector::delete_model_vectors),
        )
        .route("/vectors/models", get(vector::list_models))
        .route("/vectors/models/select", post(vector::select_model))
        // Tenant embedding rosters
        .route("/tenants/:id/models", put(vector::put_tenant_models))
        .route("/tenants/:id/models", get(vector::get_tenant_models))
        // Tools
        .route("/tools", get(tool::list_tools))
        .route("/tools/:tool/actions", get(tool::list_actions))
        .route("/tools/:tool/actions/:action", post(tool::execute_action))
        .route("/tools/:tool/query", post(tool::query_tool));

    // Auth runs first, then the rate limiter keyed on the authenticated user.
    let protected = Router::new()
        .nest("/api/v1", v1)
        .route("/metrics", get(health::metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/webhook/agent", post(webhook::agent_webhook))
        .route("/webhook/:provider", post(webhook::provider_webhook));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
