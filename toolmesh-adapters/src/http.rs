//! Shared HTTP client factory for adapters.

use std::time::Duration;
use toolmesh_core::{MeshError, MeshResult};

/// Overall request deadline for adapter HTTP calls.
pub const OVERALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the upstream to start responding.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client adapters share: rustls, bounded timeouts.
pub fn adapter_http_client() -> MeshResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(OVERALL_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| MeshError::Internal {
            reason: format!("failed to build adapter HTTP client: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        assert!(adapter_http_client().is_ok());
    }
}
