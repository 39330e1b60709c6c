//! Decision token: canonicalization, signing seam, and verification (spec §4.9).
//!
//! Signing itself needs key material, which this crate never holds — that
//! lives in `authgate_infra::signing`. This module only defines the
//! canonical bytes a signer signs over and the `Signer`/`TokenVerifier`
//! seams infra implements.

use crate::audit::canonical_json;
use crate::error::GateError;
use crate::policy::PolicyDecision;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// v0 is the only implemented scheme (HMAC-SHA256). v1 (asymmetric) is
/// planned; verification only needs the tag to route to the right verifier,
/// so the variant exists without an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "v0-hmac-sha256")]
    HmacSha256V0,
}

impl SignatureAlgorithm {
    pub fn version_tag(self) -> &'static str {
        match self {
            SignatureAlgorithm::HmacSha256V0 => "v0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Authorized,
    Blocked,
}

impl From<PolicyDecision> for Decision {
    fn from(value: PolicyDecision) -> Self {
        match value {
            PolicyDecision::Allow => Decision::Authorized,
            PolicyDecision::Block => Decision::Blocked,
        }
    }
}

/// Decision token payload (spec §3 "Decision token"). The signature covers
/// the canonical JSON of exactly this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTokenPayload {
    pub trace_id: String,
    pub decision: Decision,
    pub reason_code: Option<String>,
    pub rule_ids: Vec<String>,
    pub policy_snapshot_hash: String,
    pub order_digest: String,
    pub order: Value,
    pub subject: String,
    pub audience: String,
    pub issued_at: String,
    pub expires_at: String,
    pub nonce: String,
    pub projected_exposure: Option<f64>,
}

/// Signed decision token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionToken {
    pub payload: DecisionTokenPayload,
    pub algorithm: SignatureAlgorithm,
    /// Lowercase hex signature.
    pub signature: String,
}

/// Canonical bytes a signer signs and a verifier checks against.
pub fn canonical_payload_bytes(payload: &DecisionTokenPayload) -> Vec<u8> {
    let value = serde_json::to_value(payload).expect("DecisionTokenPayload always serializes");
    canonical_json(&value).into_bytes()
}

/// Implemented by infra over whatever key material it holds.
pub trait Signer {
    fn algorithm(&self) -> SignatureAlgorithm;
    /// Sign `bytes`, returning the raw signature bytes.
    fn sign(&self, bytes: &[u8]) -> Vec<u8>;
}

/// Implemented by infra to check a signature against the currently loaded
/// (possibly rotated) key material.
pub trait TokenVerifier {
    fn verify_signature(
        &self,
        algorithm: SignatureAlgorithm,
        bytes: &[u8],
        signature_hex: &str,
    ) -> bool;
}

/// Issue a token: canonicalize the payload, sign it, hex-encode the result.
pub fn issue(payload: DecisionTokenPayload, signer: &dyn Signer) -> DecisionToken {
    let bytes = canonical_payload_bytes(&payload);
    let signature = hex::encode(signer.sign(&bytes));
    DecisionToken {
        payload,
        algorithm: signer.algorithm(),
        signature,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub error: Option<GateError>,
}

/// Verify a token: checks, in order, expiry then signature then version
/// (spec §4.9). `now_rfc3339` and `expires_at` are compared lexicographically,
/// which is correct for RFC3339 timestamps sharing a UTC offset convention.
pub fn verify(token: &DecisionToken, verifier: &dyn TokenVerifier, now_rfc3339: &str) -> VerifyOutcome {
    if now_rfc3339 >= token.payload.expires_at.as_str() {
        return VerifyOutcome {
            valid: false,
            error: Some(GateError::TokenExpired),
        };
    }

    let bytes = canonical_payload_bytes(&token.payload);
    if !verifier.verify_signature(token.algorithm, &bytes, &token.signature) {
        return VerifyOutcome {
            valid: false,
            error: Some(GateError::InvalidSignature),
        };
    }

    // Version check: only HmacSha256V0 is implemented, so an unrecognized
    // algorithm tag can only arrive via a forward-incompatible token.
    match token.algorithm {
        SignatureAlgorithm::HmacSha256V0 => VerifyOutcome {
            valid: true,
            error: None,
        },
    }
}

/// `version:trace_id[0..8]:signature[0..32]` (spec §4.9).
pub fn compact_signature(token: &DecisionToken) -> String {
    let trace_prefix: String = token.payload.trace_id.chars().take(8).collect();
    let sig_prefix: String = token.signature.chars().take(32).collect();
    format!("{}:{}:{}", token.algorithm.version_tag(), trace_prefix, sig_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedSigner;
    impl Signer for FixedSigner {
        fn algorithm(&self) -> SignatureAlgorithm {
            SignatureAlgorithm::HmacSha256V0
        }
        fn sign(&self, bytes: &[u8]) -> Vec<u8> {
            // deterministic stand-in: not cryptographic, just order-sensitive
            bytes.iter().fold(vec![0u8; 4], |mut acc, b| {
                acc[0] ^= b;
                acc
            })
        }
    }

    struct AcceptAllVerifier;
    impl TokenVerifier for AcceptAllVerifier {
        fn verify_signature(&self, _: SignatureAlgorithm, bytes: &[u8], signature_hex: &str) -> bool {
            let expected = hex::encode(FixedSigner.sign(bytes));
            expected == signature_hex
        }
    }

    fn sample_payload() -> DecisionTokenPayload {
        DecisionTokenPayload {
            trace_id: "0123456789abcdef".to_string(),
            decision: Decision::Authorized,
            reason_code: None,
            rule_ids: vec![],
            policy_snapshot_hash: "abcd1234abcd1234".to_string(),
            order_digest: "deadbeef".to_string(),
            order: json!({"client_order_id": "ORDER-001"}),
            subject: "client-1".to_string(),
            audience: "gate".to_string(),
            issued_at: "2026-01-01T00:00:00Z".to_string(),
            expires_at: "2026-01-01T00:05:00Z".to_string(),
            nonce: "nonce-1".to_string(),
            projected_exposure: Some(18_550.0),
        }
    }

    #[test]
    fn issue_with_identical_params_and_nonce_is_deterministic() {
        let token_a = issue(sample_payload(), &FixedSigner);
        let token_b = issue(sample_payload(), &FixedSigner);
        assert_eq!(token_a.signature, token_b.signature);
    }

    #[test]
    fn verify_succeeds_before_expiry() {
        let token = issue(sample_payload(), &FixedSigner);
        let outcome = verify(&token, &AcceptAllVerifier, "2026-01-01T00:01:00Z");
        assert!(outcome.valid);
    }

    #[test]
    fn verify_fails_after_expiry() {
        let token = issue(sample_payload(), &FixedSigner);
        let outcome = verify(&token, &AcceptAllVerifier, "2026-01-01T00:10:00Z");
        assert!(!outcome.valid);
        assert_eq!(outcome.error, Some(GateError::TokenExpired));
    }

    #[test]
    fn verify_fails_on_tampered_signature() {
        let mut token = issue(sample_payload(), &FixedSigner);
        token.signature = "00000000".to_string();
        let outcome = verify(&token, &AcceptAllVerifier, "2026-01-01T00:01:00Z");
        assert_eq!(outcome.error, Some(GateError::InvalidSignature));
    }

    #[test]
    fn compact_signature_has_three_colon_separated_parts() {
        let token = issue(sample_payload(), &FixedSigner);
        let compact = compact_signature(&token);
        let parts: Vec<&str> = compact.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "v0");
        assert_eq!(parts[1].len(), 8);
    }
}
