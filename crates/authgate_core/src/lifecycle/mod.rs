//! Lifecycle event ingress: envelope schema, transition validation, and
//! order-digest tamper detection (spec §3 "Lifecycle event envelope", §4.6).

pub mod rejection;

use crate::audit::{canonical_json, sha256_hex_concat};
use rejection::RejectionReason;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    Sim,
    Mt5,
    Bridge,
    Lp,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Sim => "SIM",
            SourceKind::Mt5 => "MT5",
            SourceKind::Bridge => "BRIDGE",
            SourceKind::Lp => "LP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSource {
    pub kind: SourceKind,
    pub name: String,
    pub adapter_version: String,
    pub server_id: String,
    pub server_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub trace_id: String,
    pub client_order_id: Option<String>,
    pub lp_order_id: Option<String>,
    pub order_digest: Option<String>,
    pub decision_token_id: Option<String>,
}

/// Normalized lifecycle status (spec §3, §4.6 transition table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalizedStatus {
    Submitted,
    Accepted,
    Rejected,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Unknown,
}

impl NormalizedStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NormalizedStatus::Rejected
                | NormalizedStatus::Filled
                | NormalizedStatus::Canceled
                | NormalizedStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub status: NormalizedStatus,
    pub reason: Option<RejectionReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integrity {
    pub payload_hash: String,
    pub prev_event_hash: Option<String>,
    pub chain_id: String,
}

/// A lifecycle event envelope (spec §3). `event_id` is caller-supplied
/// (generated with `uuid` at the infra boundary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub event_version: u32,
    pub source: EventSource,
    pub occurred_at: String,
    pub ingested_at: String,
    pub correlation: Correlation,
    pub payload: Value,
    pub normalization: Normalization,
    pub integrity: Integrity,
}

/// `payload_hash = "sha256:" + hex(SHA256(canonical_json(envelope_without_integrity)))`.
///
/// `integrity` is excluded from its own hash input by construction — the
/// caller passes every other field.
#[allow(clippy::too_many_arguments)]
pub fn compute_payload_hash(
    event_id: &str,
    event_type: &str,
    event_version: u32,
    source: &EventSource,
    occurred_at: &str,
    ingested_at: &str,
    correlation: &Correlation,
    payload: &Value,
    normalization: &Normalization,
) -> String {
    let envelope_without_integrity = serde_json::json!({
        "event_id": event_id,
        "event_type": event_type,
        "event_version": event_version,
        "source": source,
        "occurred_at": occurred_at,
        "ingested_at": ingested_at,
        "correlation": correlation,
        "payload": payload,
        "normalization": normalization,
    });
    let canonical = canonical_json(&envelope_without_integrity);
    format!("sha256:{}", sha256_hex_concat(&[canonical.as_bytes()]))
}

/// Outcome of `ingest` (spec §4.6 contract). `warnings`/`has_violations` are
/// populated but the envelope is always accepted — see `check_transition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub event_id: String,
    pub hash: String,
    pub prev_hash: Option<String>,
    pub warnings: Vec<String>,
    pub has_violations: bool,
}

/// Result of checking one transition in isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCheck {
    pub allowed: bool,
    pub warning: Option<String>,
}

/// Per-`trace_id` transition table (spec §4.6). `current = None` means this
/// is the first event observed for the trace — always allowed.
pub fn check_transition(current: Option<NormalizedStatus>, incoming: NormalizedStatus) -> TransitionCheck {
    let Some(current) = current else {
        return TransitionCheck {
            allowed: true,
            warning: None,
        };
    };

    let allowed = match current {
        NormalizedStatus::Submitted => matches!(
            incoming,
            NormalizedStatus::Accepted
                | NormalizedStatus::Rejected
                | NormalizedStatus::Canceled
                | NormalizedStatus::Expired
                | NormalizedStatus::Unknown
        ),
        NormalizedStatus::Accepted => matches!(
            incoming,
            NormalizedStatus::PartiallyFilled
                | NormalizedStatus::Filled
                | NormalizedStatus::Canceled
                | NormalizedStatus::Expired
                | NormalizedStatus::Unknown
        ),
        NormalizedStatus::PartiallyFilled => matches!(
            incoming,
            NormalizedStatus::PartiallyFilled
                | NormalizedStatus::Filled
                | NormalizedStatus::Canceled
                | NormalizedStatus::Expired
                | NormalizedStatus::Unknown
        ),
        NormalizedStatus::Rejected
        | NormalizedStatus::Filled
        | NormalizedStatus::Canceled
        | NormalizedStatus::Expired => false,
        NormalizedStatus::Unknown => true,
    };

    if allowed {
        TransitionCheck {
            allowed: true,
            warning: None,
        }
    } else {
        TransitionCheck {
            allowed: false,
            warning: Some(format!("INVALID_TRANSITION: {current:?} -> {incoming:?}")),
        }
    }
}

/// An invalid transition is ingested and flagged, never rejected — the audit
/// trail preserves reality (spec §4.6).
pub fn apply_transition(current: Option<NormalizedStatus>, incoming: NormalizedStatus) -> IngestOutcome {
    let check = check_transition(current, incoming);
    IngestOutcome {
        event_id: String::new(),
        hash: String::new(),
        prev_hash: None,
        warnings: check.warning.into_iter().collect(),
        has_violations: !check.allowed,
    }
}

/// Compare an inbound `order_digest` against the digest bound to the
/// referenced decision token. `None` means the event carried no digest to
/// verify — not itself a tamper signal.
pub fn verify_order_digest(event_digest: Option<&str>, token_digest: &str) -> bool {
    match event_digest {
        Some(digest) => digest == token_digest,
        None => true,
    }
}
