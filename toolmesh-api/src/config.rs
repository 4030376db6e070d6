//! API Configuration Module
//!
//! Rate limiting, webhook secrets, and server bind settings, loaded from
//! environment variables with development defaults.

use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Token-bucket rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Sustained tokens per second per client.
    pub limit_per_second: u32,
    /// Burst capacity per client.
    pub burst: u32,
    /// Idle TTL before a client's bucket is evicted.
    pub expiration: Duration,
    /// How often the reaper sweeps idle buckets.
    pub reap_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit_per_second: 10,
            burst: 20,
            expiration: Duration::from_secs(600),
            reap_interval: Duration::from_secs(300),
        }
    }
}

// ============================================================================
// WEBHOOKS
// ============================================================================

/// Per-provider webhook secrets. A provider without a secret rejects all
/// deliveries.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    secrets: HashMap<String, String>,
}

impl WebhookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, provider: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(provider.into(), secret.into());
        self
    }

    pub fn secret_for(&self, provider: &str) -> Option<&str> {
        self.secrets.get(provider).map(String::as_str)
    }

    /// Load `TOOLMESH_WEBHOOK_SECRET_<PROVIDER>` variables.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        for provider in ["github", "harness", "sonarqube", "artifactory", "xray", "agent"] {
            let var = format!("TOOLMESH_WEBHOOK_SECRET_{}", provider.to_uppercase());
            if let Ok(secret) = std::env::var(&var) {
                if !secret.is_empty() {
                    config.secrets.insert(provider.to_string(), secret);
                }
            }
        }
        config
    }
}

// ============================================================================
// API CONFIG
// ============================================================================

/// Top-level API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    pub rate_limit: RateLimitConfig,
    pub webhooks: WebhookConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            rate_limit: RateLimitConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Environment variables:
    /// - `TOOLMESH_API_BIND` / `PORT`
    /// - `TOOLMESH_RATE_LIMIT_ENABLED`, `TOOLMESH_RATE_LIMIT_PER_SECOND`,
    ///   `TOOLMESH_RATE_LIMIT_BURST`, `TOOLMESH_RATE_LIMIT_EXPIRATION_SECS`
    /// - `TOOLMESH_WEBHOOK_SECRET_<PROVIDER>`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("TOOLMESH_API_BIND") {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("TOOLMESH_API_PORT").ok())
            .and_then(|s| s.parse().ok())
        {
            config.port = port;
        }

        config.rate_limit.enabled = std::env::var("TOOLMESH_RATE_LIMIT_ENABLED")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);
        if let Some(limit) = std::env::var("TOOLMESH_RATE_LIMIT_PER_SECOND")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.rate_limit.limit_per_second = limit;
        }
        if let Some(burst) = std::env::var("TOOLMESH_RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.rate_limit.burst = burst;
        }
        if let Some(secs) = std::env::var("TOOLMESH_RATE_LIMIT_EXPIRATION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.rate_limit.expiration = Duration::from_secs(secs);
        }

        config.webhooks = WebhookConfig::from_env();
        config
    }
}
