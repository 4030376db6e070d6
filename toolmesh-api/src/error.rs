//! Error Types for the Toolmesh API
//!
//! Tagged API errors with a stable machine code and the HTTP status it maps
//! to. Storage internals never leak: core errors are folded into the API
//! taxonomy before they reach a response body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use toolmesh_core::MeshError;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Machine-readable error codes. Each maps to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or invalid required field
    Validation,
    /// Missing or invalid credential
    Auth,
    /// Token bucket empty
    RateLimited,
    /// Context or adapter absent
    NotFound,
    /// Still over `max_tokens` after truncation
    ContextTooLarge,
    /// Tenant or agent embedding quota reached
    QuotaExceeded,
    /// Webhook HMAC verification failed
    SignatureInvalid,
    /// Webhook body over the size cap
    PayloadTooLarge,
    /// Read or upstream timeout
    Timeout,
    /// Unrecoverable backend error
    Storage,
    /// Anything else
    Internal,
}

impl ErrorCode {
    /// HTTP status for this code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Validation | ErrorCode::ContextTooLarge => StatusCode::BAD_REQUEST,
            ErrorCode::Auth | ErrorCode::SignatureInvalid => StatusCode::UNAUTHORIZED,
            ErrorCode::RateLimited | ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::Storage | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// Structured error response. Serializes as `{"error": ..., "code": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable message.
    #[serde(rename = "error")]
    pub message: String,
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Retry hint in seconds, set on rate limiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            retry_after: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::Validation,
            format!("Required field '{field}' is missing"),
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Auth, message)
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            message: format!("Rate limit exceeded. Retry after {retry_after} seconds"),
            code: ErrorCode::RateLimited,
            retry_after: Some(retry_after),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn signature_invalid(provider: &str) -> Self {
        Self::new(
            ErrorCode::SignatureInvalid,
            format!("Invalid webhook signature for provider '{provider}'"),
        )
    }

    pub fn payload_too_large(limit_bytes: usize) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Payload exceeds the {limit_bytes} byte limit"),
        )
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(ErrorCode::Timeout, format!("Operation '{operation}' timed out"))
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Storage, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ============================================================================
// CORE ERROR FOLDING
// ============================================================================

impl From<MeshError> for ApiError {
    fn from(err: MeshError) -> Self {
        match &err {
            MeshError::Validation(_) => ApiError::validation(err.to_string()),
            MeshError::Storage(e) if e.is_not_found() => ApiError::not_found(err.to_string()),
            MeshError::Storage(_) => {
                // Log the backend detail, surface a generic storage error.
                tracing::error!(error = %err, "storage backend error");
                ApiError::storage("Storage operation failed")
            }
            MeshError::Budget(_) => ApiError::new(ErrorCode::ContextTooLarge, err.to_string()),
            MeshError::Quota(_) => ApiError::new(ErrorCode::QuotaExceeded, err.to_string()),
            MeshError::Vector(_) => ApiError::validation(err.to_string()),
            MeshError::Signature(_) => {
                ApiError::new(ErrorCode::SignatureInvalid, err.to_string())
            }
            MeshError::Adapter(toolmesh_core::AdapterError::NotFound { .. }) => {
                ApiError::not_found(err.to_string())
            }
            MeshError::Adapter(_) => ApiError::internal(err.to_string()),
            MeshError::Timeout { .. } => ApiError::new(ErrorCode::Timeout, err.to_string()),
            MeshError::Internal { .. } => ApiError::internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::validation(format!("Invalid JSON: {err}"))
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use toolmesh_core::{BudgetError, StorageError, ValidationError};

    #[test]
    fn test_status_mapping_matches_contract() {
        assert_eq!(ErrorCode::Validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Auth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ErrorCode::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::ContextTooLarge.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::QuotaExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::SignatureInvalid.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ErrorCode::Storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_core_errors_fold_into_api_codes() {
        let err: ApiError = MeshError::Validation(ValidationError::RequiredFieldMissing {
            field: "agent_id".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::Validation);

        let err: ApiError = MeshError::not_found("context", "ctx-1").into();
        assert_eq!(err.code, ErrorCode::NotFound);

        let err: ApiError = MeshError::Storage(StorageError::Unavailable {
            reason: "connection refused to 10.0.0.5".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::Storage);
        // Backend detail does not leak into the response body.
        assert!(!err.message.contains("10.0.0.5"));

        let err: ApiError = MeshError::Budget(BudgetError::ContextTooLarge {
            context_id: "c".to_string(),
            current_tokens: 11,
            max_tokens: 10,
        })
        .into();
        assert_eq!(err.code, ErrorCode::ContextTooLarge);
    }

    #[test]
    fn test_error_body_shape() {
        let err = ApiError::not_found("Context ctx-1 not found");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "Context ctx-1 not found");
        assert_eq!(json["code"], "NOT_FOUND");
        assert!(json.get("retry_after").is_none());
    }

    #[test]
    fn test_rate_limited_carries_retry_hint() {
        let err = ApiError::rate_limited(7);
        assert_eq!(err.retry_after, Some(7));
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
