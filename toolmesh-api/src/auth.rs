//! Authentication Module
//!
//! Two authentication methods guard the API surface:
//! 1. API keys (`X-API-Key` header), resolved against a table that is
//!    rebuilt atomically whenever keys are (re)loaded
//! 2. Bearer tokens (`Authorization: Bearer`), HS256 JWTs
//!
//! The resolved user id keys the rate limiter, so a client cannot escape its
//! bucket by rotating connection addresses.

use crate::error::{ApiError, ApiResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ============================================================================
// CLOCK ABSTRACTION
// ============================================================================

/// Clock for JWT expiry validation. Owning expiry validation (instead of
/// delegating to the JWT library) keeps tests deterministic.
pub trait JwtClock: Send + Sync {
    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

// ============================================================================
// JWT SECRET
// ============================================================================

/// Bearer-token secret that cannot be logged accidentally.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Reject empty secrets at construction.
    pub fn new(secret: String) -> ApiResult<Self> {
        if secret.is_empty() {
            return Err(ApiError::internal("JWT secret must not be empty"));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED])")
    }
}

/// JWT claims carried by bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user id.
    pub sub: String,
    /// Expiry, Unix epoch seconds.
    pub exp: i64,
    /// Issued-at, Unix epoch seconds.
    pub iat: i64,
}

// ============================================================================
// API KEY TABLE
// ============================================================================

/// API-key table mapping keys to user ids. Lookups take the read lock;
/// `replace_keys` rebuilds the whole table atomically under the write lock.
#[derive(Default)]
pub struct ApiKeyTable {
    keys: RwLock<HashMap<String, String>>,
}

impl ApiKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the table contents.
    pub fn replace_keys(&self, keys: HashMap<String, String>) {
        let mut table = self.keys.write().unwrap_or_else(|e| e.into_inner());
        *table = keys;
    }

    /// Resolve a key to its user id.
    pub fn resolve(&self, api_key: &str) -> Option<String> {
        let table = self.keys.read().unwrap_or_else(|e| e.into_inner());
        table.get(api_key).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// AUTH GATE
// ============================================================================

/// How a request authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Bearer,
}

/// The authenticated identity injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub method: AuthMethod,
}

/// Credential validation for the API surface.
pub struct AuthGate {
    table: ApiKeyTable,
    jwt_secret: JwtSecret,
    clock: Arc<dyn JwtClock>,
}

impl AuthGate {
    pub fn new(jwt_secret: JwtSecret) -> Self {
        Self {
            table: ApiKeyTable::new(),
            jwt_secret,
            clock: Arc::new(SystemClock),
        }
    }

    /// Inject a clock, for tests.
    pub fn with_clock(mut self, clock: Arc<dyn JwtClock>) -> Self {
        self.clock = clock;
        self
    }

    /// The key table, for atomic rebuilds at startup or on rotation.
    pub fn api_keys(&self) -> &ApiKeyTable {
        &self.table
    }

    /// Validate a request's credentials. API key wins when both are present.
    pub fn authenticate(
        &self,
        api_key: Option<&str>,
        authorization: Option<&str>,
    ) -> ApiResult<AuthContext> {
        if let Some(key) = api_key {
            return match self.table.resolve(key) {
                Some(user_id) => Ok(AuthContext {
                    user_id,
                    method: AuthMethod::ApiKey,
                }),
                None => Err(ApiError::unauthorized("Invalid API key")),
            };
        }

        if let Some(value) = authorization {
            let token = value
                .strip_prefix("Bearer ")
                .ok_or_else(|| {
                    ApiError::unauthorized("Authorization header must use the Bearer scheme")
                })?;
            let claims = self.validate_token(token)?;
            return Ok(AuthContext {
                user_id: claims.sub,
                method: AuthMethod::Bearer,
            });
        }

        Err(ApiError::unauthorized(
            "Authentication required: provide X-API-Key or Authorization header",
        ))
    }

    /// Decode and validate a bearer token. Expiry is checked against the
    /// injected clock rather than the library's system clock.
    pub fn validate_token(&self, token: &str) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.expose().as_bytes()),
            &validation,
        )
        .map_err(|e| ApiError::unauthorized(format!("Invalid bearer token: {e}")))?;

        if data.claims.exp <= self.clock.now_epoch_secs() {
            return Err(ApiError::unauthorized("Bearer token has expired"));
        }
        Ok(data.claims)
    }

    /// Issue a token for a user id, valid for `ttl_secs`.
    pub fn generate_token(&self, user_id: &str, ttl_secs: i64) -> ApiResult<String> {
        let now = self.clock.now_epoch_secs();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl_secs,
            iat: now,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.expose().as_bytes()),
        )
        .map_err(|e| ApiError::internal(format!("Failed to sign token: {e}")))
    }
}

// ============================================================================
// TESTS
// ============================================================================
