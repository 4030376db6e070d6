//! Tenant embedding configuration: model rosters and quotas.
//!
//! A tenant is the billing and quota boundary. Its configuration names the
//! embedding models it may use, which one is the default, and the token and
//! request caps per model. Live usage counters are tracked by the embedding
//! store; this module only carries the declarative shape and the selection
//! rules that operate on it.

use crate::{QuotaError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One model in a tenant's roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model_id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    /// Higher wins when falling back to priority selection.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_token_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_token_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_request_limit: Option<u64>,
}

/// Live usage counters for one (tenant, model) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub monthly_tokens: u64,
    pub daily_tokens: u64,
    pub monthly_requests: u64,
}

impl ModelEntry {
    /// Check this entry's quotas against observed usage.
    pub fn check_quota(&self, usage: &ModelUsage) -> Result<(), QuotaError> {
        if let Some(limit) = self.monthly_token_limit {
            if usage.monthly_tokens >= limit {
                return Err(QuotaError::MonthlyTokens {
                    model_id: self.model_id.clone(),
                    limit,
                });
            }
        }
        if let Some(limit) = self.daily_token_limit {
            if usage.daily_tokens >= limit {
                return Err(QuotaError::DailyTokens {
                    model_id: self.model_id.clone(),
                    limit,
                });
            }
        }
        if let Some(limit) = self.monthly_request_limit {
            if usage.monthly_requests >= limit {
                return Err(QuotaError::MonthlyRequests {
                    model_id: self.model_id.clone(),
                    limit,
                });
            }
        }
        Ok(())
    }
}

/// A tenant's embedding model roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantEmbeddingConfig {
    pub tenant_id: String,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    /// Optional per-agent preferred model.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub agent_preferences: HashMap<String, String>,
}

impl TenantEmbeddingConfig {
    /// Validate the roster: at most one default, default must be enabled.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let defaults: Vec<&ModelEntry> = self.models.iter().filter(|m| m.is_default).collect();
        if defaults.len() > 1 {
            return Err(ValidationError::InvalidValue {
                field: "models".to_string(),
                reason: format!("{} default models configured, at most one allowed", defaults.len()),
            });
        }
        if let Some(default) = defaults.first() {
            if !default.enabled {
                return Err(ValidationError::InvalidValue {
                    field: "models".to_string(),
                    reason: format!("default model {} is disabled", default.model_id),
                });
            }
        }
        Ok(())
    }

    /// Look up an enabled entry by model id.
    pub fn enabled_entry(&self, model_id: &str) -> Option<&ModelEntry> {
        self.models
            .iter()
            .find(|m| m.enabled && m.model_id == model_id)
    }

    /// The tenant default, when one is configured and enabled.
    pub fn default_entry(&self) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.enabled && m.is_default)
    }

    /// Highest-priority enabled entry. Ties resolve to the earlier entry.
    pub fn highest_priority_entry(&self) -> Option<&ModelEntry> {
        self.models
            .iter()
            .filter(|m| m.enabled)
            .max_by_key(|m| (m.priority, std::cmp::Reverse(self.position(&m.model_id))))
    }

    fn position(&self, model_id: &str) -> usize {
        self.models
            .iter()
            .position(|m| m.model_id == model_id)
            .unwrap_or(usize::MAX)
    }

    /// Preferred model for an agent, when configured.
    pub fn agent_preference(&self, agent_id: &str) -> Option<&ModelEntry> {
        let model_id = self.agent_preferences.get(agent_id)?;
        self.enabled_entry(model_id)
    }
}
