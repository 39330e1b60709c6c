//! Pure assembly of trace bundles, evidence packs, and LP timelines from an
//! already-fetched event stream (spec §4.7). I/O (fetching the stream,
//! failing closed on a broken chain) lives at the infra boundary; everything
//! here is testable without a store.

use crate::audit::{canonical_json, sha256_hex_concat, AuditEvent};
use crate::lifecycle::{LifecycleEnvelope, NormalizedStatus};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct TraceSummary {
    pub outcome: String,
    pub decision: Option<String>,
    pub reason: Option<String>,
    pub policy_version: Option<String>,
    pub override_detail: Option<Value>,
    pub economics_impact: Option<Value>,
    pub order: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceBundle {
    pub events: Vec<AuditEvent>,
    pub summary: TraceSummary,
    pub integrity_verified: bool,
}

/// Assemble a trace bundle from an ordered event list. The caller has
/// already verified the chain (or this function wouldn't be called — the
/// infra wrapper fails closed before reaching here); `integrity_verified`
/// is still threaded through explicitly so tests can exercise the false case.
pub fn trace_bundle(events: Vec<AuditEvent>, integrity_verified: bool) -> TraceBundle {
    let summary = summarize(&events);
    TraceBundle {
        events,
        summary,
        integrity_verified,
    }
}

fn summarize(events: &[AuditEvent]) -> TraceSummary {
    let mut summary = TraceSummary {
        outcome: "UNKNOWN".to_string(),
        decision: None,
        reason: None,
        policy_version: None,
        override_detail: None,
        economics_impact: None,
        order: None,
    };

    for event in events {
        match event.event_type.as_str() {
            "authorize.requested" => {
                summary.order = event.payload.get("order").cloned();
            }
            "authorize.authorized" | "authorize.blocked" => {
                let token = event.payload.get("token");
                summary.decision = token
                    .and_then(|t| t.get("decision"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                summary.reason = token
                    .and_then(|t| t.get("reason_code"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                summary.policy_version = event
                    .payload
                    .get("policy_version")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                summary.economics_impact = event.payload.get("economics").cloned();
                summary.outcome = summary
                    .decision
                    .clone()
                    .unwrap_or_else(|| "UNKNOWN".to_string());
            }
            "authorize.override" => {
                summary.override_detail = Some(event.payload.clone());
            }
            _ => {}
        }
    }

    summary
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidencePackComponents {
    pub policy_snapshot: Value,
    pub decision: Value,
    pub audit_chain: Value,
    pub economics: Value,
    pub operator_identity: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidencePack {
    pub component_hashes: Vec<String>,
    pub pack_hash: String,
    pub policy_consistent: bool,
}

/// Hash each component (fixed order: policy_snapshot, decision, audit_chain,
/// economics, operator_identity) and the concatenation of those hashes
/// (spec §4.7 "Evidence pack").
///
/// `token_policy_snapshot_hash` is the 16-hex value carried on the decision
/// token; consistency holds iff it equals the first 16 hex chars of
/// `SHA256(policy_snapshot.policyContent)`.
pub fn evidence_pack(components: EvidencePackComponents, token_policy_snapshot_hash: &str) -> EvidencePack {
    let hashes = [
        &components.policy_snapshot,
        &components.decision,
        &components.audit_chain,
        &components.economics,
        &components.operator_identity,
    ]
    .map(|component| sha256_hex_concat(&[canonical_json(component).as_bytes()]));

    let joined = hashes.join(":");
    let pack_hash = sha256_hex_concat(&[joined.as_bytes()]);

    let policy_content_hash = components
        .policy_snapshot
        .get("policyContent")
        .map(|content| sha256_hex_concat(&[canonical_json(content).as_bytes()]))
        .unwrap_or_default();
    let policy_consistent = policy_content_hash.get(..16) == Some(token_policy_snapshot_hash);

    EvidencePack {
        component_hashes: hashes.to_vec(),
        pack_hash,
        policy_consistent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    Valid,
    Invalid,
    TamperSuspected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpTimelineEntry {
    pub event_id: String,
    pub status: NormalizedStatus,
    pub is_terminal: bool,
    pub has_violations: bool,
    pub integrity_status: IntegrityStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpTimeline {
    pub entries: Vec<LpTimelineEntry>,
    pub current_status: NormalizedStatus,
    pub has_violations: bool,
    pub filled_qty: f64,
    pub remaining_qty: f64,
    pub fill_count: u64,
    pub avg_fill_price: Option<f64>,
}

/// Fold a chronologically-ordered lifecycle event stream into a timeline.
/// Fill aggregation considers `FILLED`/`PARTIALLY_FILLED` events only.
pub fn lp_timeline(
    envelopes: &[LifecycleEnvelope],
    entry_status: impl Fn(&LifecycleEnvelope) -> (bool, IntegrityStatus),
    order_qty: f64,
) -> LpTimeline {
    let mut entries = Vec::with_capacity(envelopes.len());
    let mut current_status = NormalizedStatus::Unknown;
    let mut has_violations = false;
    let mut filled_qty = 0.0;
    let mut fill_count: u64 = 0;
    let mut fill_notional = 0.0;

    for envelope in envelopes {
        let status = envelope.normalization.status;
        let (violated, integrity_status) = entry_status(envelope);
        has_violations |= violated;
        current_status = status;

        if matches!(status, NormalizedStatus::Filled | NormalizedStatus::PartiallyFilled) {
            if let Some(qty) = envelope.payload.get("fill_qty").and_then(Value::as_f64) {
                if let Some(price) = envelope.payload.get("fill_price").and_then(Value::as_f64) {
                    filled_qty += qty;
                    fill_count += 1;
                    fill_notional += qty * price;
                }
            }
        }

        entries.push(LpTimelineEntry {
            event_id: envelope.event_id.clone(),
            status,
            is_terminal: status.is_terminal(),
            has_violations: violated,
            integrity_status,
        });
    }

    let avg_fill_price = if fill_count > 0 {
        Some(fill_notional / filled_qty)
    } else {
        None
    };

    LpTimeline {
        entries,
        current_status,
        has_violations,
        filled_qty,
        remaining_qty: (order_qty - filled_qty).max(0.0),
        fill_count,
        avg_fill_price,
    }
}
