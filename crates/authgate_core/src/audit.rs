//! Canonical JSON and the hash-chained audit event.
//!
//! `canonical_json` is used by every hash-sensitive consumer in this crate:
//! the audit chain producer/verifier, the decision token signer, the
//! lifecycle envelope `payload_hash`, and the evidence-pack builder. Drift
//! between producers here is a silent tamper signal, so there is exactly one
//! implementation.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value as canonical bytes: object keys sorted lexicographically
/// at every depth, compact separators, array order preserved, numbers kept in
/// their original decimal form (never re-parsed through `f64`).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialization cannot fail"))
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("key serialization cannot fail"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// SHA-256 of a sequence of byte slices, concatenated in order. Used for
/// every chained hash in this system so the pipe-separated input convention
/// (spec §3/§4.4) stays in one place.
pub fn sha256_hex_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// An append-only, hash-chained audit event (spec §3 "Audit event", §4.4).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuditEvent {
    pub trace_id: String,
    pub event_type: String,
    pub event_version: u32,
    pub payload: Value,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub created_at: String,
}

/// Compute the hash for an event given its predecessor's hash (or `None` for
/// the first event in a chain).
///
/// `hash = SHA256(prev_hash_or_empty | event_type | event_version | canonical_json(payload))`
pub fn compute_event_hash(
    prev_hash: Option<&str>,
    event_type: &str,
    event_version: u32,
    payload: &Value,
) -> String {
    let prev = prev_hash.unwrap_or("");
    let version = event_version.to_string();
    let payload_json = canonical_json(payload);
    sha256_hex_concat(&[
        prev.as_bytes(),
        b"|",
        event_type.as_bytes(),
        b"|",
        version.as_bytes(),
        b"|",
        payload_json.as_bytes(),
    ])
}

/// Build the next event in a chain given the previous event, if any.
pub fn build_event(
    trace_id: impl Into<String>,
    event_type: impl Into<String>,
    event_version: u32,
    payload: Value,
    created_at: impl Into<String>,
    predecessor: Option<&AuditEvent>,
) -> AuditEvent {
    let trace_id = trace_id.into();
    let event_type = event_type.into();
    let prev_hash = predecessor.map(|e| e.hash.clone());
    let hash = compute_event_hash(prev_hash.as_deref(), &event_type, event_version, &payload);
    AuditEvent {
        trace_id,
        event_type,
        event_version,
        payload,
        prev_hash,
        hash,
        created_at: created_at.into(),
    }
}

/// Outcome of verifying a chain of events for a single trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    pub broken_at: Option<usize>,
    pub reason: Option<String>,
}

/// Verify a trace's event chain (spec §4.4). Events must be supplied in
/// append order. The first event must carry no `prev_hash`.
pub fn verify_chain(events: &[AuditEvent]) -> ChainVerification {
    let Some(first) = events.first() else {
        return ChainVerification {
            valid: true,
            broken_at: None,
            reason: None,
        };
    };

    if first.prev_hash.is_some() {
        return ChainVerification {
            valid: false,
            broken_at: Some(0),
            reason: Some("first event in chain must not have a prev_hash".to_string()),
        };
    }

    let mut predecessor = first;
    for (index, event) in events.iter().enumerate() {
        let expected_hash = compute_event_hash(
            event.prev_hash.as_deref(),
            &event.event_type,
            event.event_version,
            &event.payload,
        );
        if expected_hash != event.hash {
            return ChainVerification {
                valid: false,
                broken_at: Some(index),
                reason: Some("recomputed hash does not match stored hash".to_string()),
            };
        }
        if index > 0 {
            let Some(prev_hash) = &event.prev_hash else {
                return ChainVerification {
                    valid: false,
                    broken_at: Some(index),
                    reason: Some("missing prev_hash on non-first event".to_string()),
                };
            };
            if prev_hash != &predecessor.hash {
                return ChainVerification {
                    valid: false,
                    broken_at: Some(index),
                    reason: Some("prev_hash does not match predecessor's hash".to_string()),
                };
            }
        }
        predecessor = event;
    }

    ChainVerification {
        valid: true,
        broken_at: None,
        reason: None,
    }
}
