//! Webhook signature protocols.
//!
//! Every provider signs the raw request body with HMAC-SHA256 over a shared
//! secret. GitHub prefixes the hex digest with `sha256=`; the others send the
//! raw hex digest. Verification compares in constant time over the exact
//! bytes read from the wire.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use toolmesh_core::{MeshResult, SignatureError};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// PROVIDERS
// ============================================================================

/// Webhook providers the intake pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookProvider {
    GitHub,
    Harness,
    SonarQube,
    Artifactory,
    Xray,
    /// The generic agent webhook.
    Agent,
}

impl WebhookProvider {
    /// Parse the `{provider}` path segment.
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "github" => Some(WebhookProvider::GitHub),
            "harness" => Some(WebhookProvider::Harness),
            "sonarqube" => Some(WebhookProvider::SonarQube),
            "artifactory" => Some(WebhookProvider::Artifactory),
            "xray" => Some(WebhookProvider::Xray),
            "agent" => Some(WebhookProvider::Agent),
            _ => None,
        }
    }

    /// Registry/config name of this provider.
    pub fn name(&self) -> &'static str {
        match self {
            WebhookProvider::GitHub => "github",
            WebhookProvider::Harness => "harness",
            WebhookProvider::SonarQube => "sonarqube",
            WebhookProvider::Artifactory => "artifactory",
            WebhookProvider::Xray => "xray",
            WebhookProvider::Agent => "agent",
        }
    }

    /// Required signature header.
    pub fn signature_header(&self) -> &'static str {
        match self {
            WebhookProvider::GitHub => "x-hub-signature-256",
            WebhookProvider::Harness => "x-harness-signature",
            WebhookProvider::SonarQube => "x-sonar-signature",
            WebhookProvider::Artifactory | WebhookProvider::Xray => "x-jfrog-signature",
            WebhookProvider::Agent => "x-mcp-signature",
        }
    }

    /// Header carrying the event type, when the provider sends one.
    pub fn event_header(&self) -> Option<&'static str> {
        match self {
            WebhookProvider::GitHub => Some("x-github-event"),
            WebhookProvider::Harness => Some("x-harness-event"),
            WebhookProvider::Artifactory | WebhookProvider::Xray => Some("x-jfrog-event-type"),
            WebhookProvider::SonarQube | WebhookProvider::Agent => None,
        }
    }

    /// Event type used when neither header nor query supplies one.
    pub fn default_event_type(&self) -> &'static str {
        match self {
            WebhookProvider::GitHub => "push",
            WebhookProvider::Harness => "pipeline",
            WebhookProvider::SonarQube => "analysis",
            WebhookProvider::Artifactory => "artifact",
            WebhookProvider::Xray => "scan",
            WebhookProvider::Agent => "event",
        }
    }

    /// Whether signatures carry the `sha256=` prefix.
    pub fn prefixed_signature(&self) -> bool {
        matches!(self, WebhookProvider::GitHub)
    }
}

// ============================================================================
// SIGN / VERIFY
// ============================================================================

/// Hex HMAC-SHA256 of `payload` under `secret`, in the provider's wire form.
pub fn sign(provider: WebhookProvider, secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    let digest = hex::encode(mac.finalize().into_bytes());
    if provider.prefixed_signature() {
        format!("sha256={digest}")
    } else {
        digest
    }
}

/// Verify a signature header value against the exact payload bytes.
///
/// The comparison runs over the decoded MAC in constant time; a malformed or
/// truncated header fails without shortcutting on length alone revealing
/// anything beyond the digest size.
pub fn verify(
    provider: WebhookProvider,
    secret: &str,
    payload: &[u8],
    header_value: &str,
) -> MeshResult<()> {
    let mismatch = || {
        SignatureError::Mismatch {
            provider: provider.name().to_string(),
        }
        .into()
    };

    let hex_digest = if provider.prefixed_signature() {
        match header_value.strip_prefix("sha256=") {
            Some(rest) => rest,
            None => return Err(mismatch()),
        }
    } else {
        header_value
    };

    let Ok(expected) = hex::decode(hex_digest) else {
        return Err(mismatch());
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| mismatch())
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// sign/verify round-trips for any payload and secret.
        #[test]
        fn prop_sign_verify_round_trip(
            payload in prop::collection::vec(any::<u8>(), 0..256),
            secret in ".{1,40}",
        ) {
            let signature = sign(WebhookProvider::Agent, &secret, &payload);
            prop_assert!(verify(WebhookProvider::Agent, &secret, &payload, &signature).is_ok());
        }

        /// Any single flipped payload byte invalidates the signature.
        #[test]
        fn prop_flipped_byte_fails(
            mut payload in prop::collection::vec(any::<u8>(), 1..256),
            secret in ".{1,40}",
            flip in any::<usize>(),
        ) {
            let signature = sign(WebhookProvider::Agent, &secret, &payload);
            let idx = flip % payload.len();
            payload[idx] ^= 0x01;
            prop_assert!(verify(WebhookProvider::Agent, &secret, &payload, &signature).is_err());
        }
    }
}
