//! Payload hashing and retention arithmetic for idempotency records.

use crate::audit::{canonical_json, sha256_hex_concat};
use serde_json::Value;

/// Hash a lifecycle-event payload the same way every other hash-sensitive
/// consumer in this crate does: canonical JSON, then SHA-256. Used to detect
/// `payload_mismatch` on a duplicate key (spec §4.5).
pub fn compute_payload_hash(payload: &Value) -> String {
    let canonical = canonical_json(payload);
    sha256_hex_concat(&[canonical.as_bytes()])
}

/// Whether a record first seen at `first_seen_at` (epoch seconds) has aged
/// past `retention_days` as of `now` (epoch seconds). Used by
/// `authgate_infra::store::idempotency_store::cleanup` (spec §4.5, §6
/// `IDEMPOTENCY_RETENTION_DAYS`).
pub fn is_expired(first_seen_at: u64, now: u64, retention_days: f64) -> bool {
    if retention_days <= 0.0 {
        return now >= first_seen_at;
    }
    let retention_seconds = (retention_days * 86_400.0) as u64;
    now.saturating_sub(first_seen_at) >= retention_seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_hash_is_deterministic_regardless_of_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(compute_payload_hash(&a), compute_payload_hash(&b));
    }

    #[test]
    fn different_payloads_hash_differently() {
        assert_ne!(compute_payload_hash(&json!({"a": 1})), compute_payload_hash(&json!({"a": 2})));
    }

    #[test]
    fn not_expired_before_retention_window_elapses() {
        let day = 86_400;
        assert!(!is_expired(0, 6 * day, 7.0));
    }

    #[test]
    fn expired_after_retention_window_elapses() {
        let day = 86_400;
        assert!(is_expired(0, 7 * day, 7.0));
    }
}
