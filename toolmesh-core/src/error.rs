//! Error types for Toolmesh operations

use thiserror::Error;

/// Validation errors for required or malformed fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Storage layer errors. Backend-specific failures are wrapped into these
/// variants; the raw backend error never crosses the core boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Read failed for {entity} {id}: {reason}")]
    ReadFailed {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Write failed for {entity} {id}: {reason}")]
    WriteFailed {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Delete failed for {entity} {id}: {reason}")]
    DeleteFailed {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Storage backend unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StorageError {
    /// True when the error is an absence, not a backend failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Token budget errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error(
        "Context {context_id} exceeds token budget after truncation: {current_tokens} > {max_tokens}"
    )]
    ContextTooLarge {
        context_id: String,
        current_tokens: u32,
        max_tokens: u32,
    },
}

/// Tenant embedding quota errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("Monthly token quota exhausted for model {model_id} (limit {limit})")]
    MonthlyTokens { model_id: String, limit: u64 },

    #[error("Daily token quota exhausted for model {model_id} (limit {limit})")]
    DailyTokens { model_id: String, limit: u64 },

    #[error("Monthly request quota exhausted for model {model_id} (limit {limit})")]
    MonthlyRequests { model_id: String, limit: u64 },

    #[error("No embedding model available for tenant {tenant_id}")]
    NoModelAvailable { tenant_id: String },
}

/// Vector operation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: i32, got: i32 },

    #[error("Model {model_id} declares {declared} dimensions, vector has {got}")]
    ModelDimensionMismatch {
        model_id: String,
        declared: i32,
        got: i32,
    },

    #[error("Unsupported embedding model: {model_id}")]
    UnsupportedModel { model_id: String },
}

/// Webhook signature errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header {header} for provider {provider}")]
    MissingHeader {
        provider: String,
        header: &'static str,
    },

    #[error("No webhook secret configured for provider {provider}")]
    MissingSecret { provider: String },

    #[error("Signature mismatch for provider {provider}")]
    Mismatch { provider: String },
}

/// Adapter lookup and execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Adapter not registered: {name}")]
    NotFound { name: String },

    #[error("Adapter {tool} failed to execute {action}: {reason}")]
    ExecutionFailed {
        tool: String,
        action: String,
        reason: String,
    },

    #[error("Adapter {tool} query failed: {reason}")]
    QueryFailed { tool: String, reason: String },

    #[error("Adapter {tool} webhook handling failed: {reason}")]
    WebhookFailed { tool: String, reason: String },
}

/// Master error type for all Toolmesh core operations.
#[derive(Debug, Clone, Error)]
pub enum MeshError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Operation '{operation}' timed out")]
    Timeout { operation: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl MeshError {
    /// Shortcut for a missing required field.
    pub fn missing_field(field: &str) -> Self {
        MeshError::Validation(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        })
    }

    /// Shortcut for an absent entity.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MeshError::Storage(StorageError::NotFound {
            entity,
            id: id.into(),
        })
    }

    /// True when the error maps to an absence rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            MeshError::Storage(e) => e.is_not_found(),
            MeshError::Adapter(AdapterError::NotFound { .. }) => true,
            _ => false,
        }
    }
}

/// Result type alias for Toolmesh core operations.
pub type MeshResult<T> = Result<T, MeshError>;
