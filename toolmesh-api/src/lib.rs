//! Toolmesh API - REST Layer
//!
//! Binds HTTP to the core: context CRUD, vector operations, tool execution
//! through the bridge, the webhook intake pipeline, health, and metrics.
//! Authentication (API key / bearer) and per-client rate limiting run as
//! middleware in front of every `/api/v1` route.

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod routes;
pub mod signature;
pub mod state;
pub mod telemetry;

pub use auth::{ApiKeyTable, AuthContext, AuthGate, AuthMethod, Claims, FixedClock, JwtClock, JwtSecret, SystemClock};
pub use config::{ApiConfig, RateLimitConfig, WebhookConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use ratelimit::ClientRateLimiter;
pub use routes::api_router;
pub use signature::{sign, verify, WebhookProvider};
pub use state::{AppState, CoreServices};
pub use telemetry::{init_tracing, Metrics};
