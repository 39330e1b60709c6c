//! I/O-backed wrappers around the pure assembly functions in
//! `authgate_core::reconstruction` (spec §4.7): fetch from the audit log
//! and lifecycle store, verify the chain, and fail closed
//! (`GateError::ReplayIntegrityFailure`) before ever reaching the pure
//! bundle/pack/timeline builders — never a best-effort return on a broken
//! chain (spec §4.4 "Verification").

use crate::store::audit_store::AuditStore;
use crate::store::lifecycle_store::LifecycleStore;
use authgate_core::audit::verify_chain;
use authgate_core::error::GateError;
use authgate_core::lifecycle::{check_transition, NormalizedStatus};
use authgate_core::reconstruction::{
    evidence_pack, lp_timeline, trace_bundle, EvidencePack, EvidencePackComponents, IntegrityStatus, LpTimeline,
    TraceBundle,
};
use serde_json::Value;
use std::cell::Cell;

/// Wires the pure reconstruction functions to the stores that hold their
/// inputs. Holds no state of its own — every call re-fetches and
/// re-verifies rather than trusting a cached verification result across
/// calls.
pub struct ReconstructionService<'a> {
    audit: &'a AuditStore,
    lifecycle: &'a LifecycleStore,
}

impl<'a> ReconstructionService<'a> {
    pub fn new(audit: &'a AuditStore, lifecycle: &'a LifecycleStore) -> Self {
        Self { audit, lifecycle }
    }

    fn fetch_verified(&self, trace_id: &str) -> Result<Vec<authgate_core::audit::AuditEvent>, GateError> {
        let events = self.audit.read(trace_id);
        if events.is_empty() {
            return Err(GateError::ReplayIntegrityFailure { broken_at: None });
        }
        let verification = verify_chain(&events);
        if !verification.valid {
            tracing::error!(trace_id, broken_at = ?verification.broken_at, "audit chain verification failed");
            return Err(GateError::ReplayIntegrityFailure {
                broken_at: verification.broken_at.map(|index| index.to_string()),
            });
        }
        Ok(events)
    }

    /// `trace_bundle` (spec §4.7, Testable Property 6: reconstruction fails
    /// closed on a broken chain).
    pub fn trace_bundle(&self, trace_id: &str) -> Result<TraceBundle, GateError> {
        let events = self.fetch_verified(trace_id)?;
        Ok(trace_bundle(events, true))
    }

    /// `evidence_pack` (spec §4.7): assembles the fixed-order component set
    /// from the terminal `authorize.*` event recorded for this trace.
    pub fn evidence_pack(&self, trace_id: &str, operator_identity: Value) -> Result<EvidencePack, GateError> {
        let events = self.fetch_verified(trace_id)?;

        let decision_event = events
            .iter()
            .rev()
            .find(|e| e.event_type == "authorize.authorized" || e.event_type == "authorize.blocked")
            .ok_or(GateError::ReplayIntegrityFailure { broken_at: None })?;

        let token = decision_event.payload.get("token").cloned().unwrap_or(Value::Null);
        let economics = decision_event.payload.get("economics").cloned().unwrap_or(Value::Null);
        let policy_snapshot_hash = token
            .get("policy_snapshot_hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let policy_snapshot = events
            .iter()
            .find_map(|e| e.payload.get("policy_snapshot").cloned())
            .unwrap_or_else(|| serde_json::json!({ "policyContent": {} }));

        let audit_chain = serde_json::json!({
            "valid": true,
            "event_count": events.len(),
        });

        let components = EvidencePackComponents {
            policy_snapshot,
            decision: token,
            audit_chain,
            economics,
            operator_identity,
        };

        Ok(evidence_pack(components, &policy_snapshot_hash))
    }

    /// `lp_timeline` (spec §4.7): fold the materialized lifecycle history
    /// for `chain_id`. Re-derives each entry's transition violation by
    /// replaying `check_transition` over the ordered stream rather than
    /// trusting a cached flag, and flags `TamperSuspected` when an event's
    /// `order_digest` disagrees with the authorized token's.
    pub fn lp_timeline(&self, chain_id: &str, token_order_digest: Option<&str>, order_qty: f64) -> LpTimeline {
        let envelopes = self.lifecycle.events(chain_id);
        let prev_status: Cell<Option<NormalizedStatus>> = Cell::new(None);

        lp_timeline(
            &envelopes,
            |envelope| {
                let check = check_transition(prev_status.get(), envelope.normalization.status);
                prev_status.set(Some(envelope.normalization.status));

                let integrity_status = match (envelope.correlation.order_digest.as_deref(), token_order_digest) {
                    (Some(event_digest), Some(token_digest)) if event_digest != token_digest => {
                        IntegrityStatus::TamperSuspected
                    }
                    _ => IntegrityStatus::Valid,
                };

                (!check.allowed, integrity_status)
            },
            order_qty,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authgate_core::idempotency::IdempotencyKey;
    use authgate_core::lifecycle::{Correlation, EventSource, Integrity, LifecycleEnvelope, Normalization, SourceKind};
    use serde_json::json;

    fn lifecycle_envelope(trace_id: &str, status: NormalizedStatus, order_digest: Option<&str>) -> LifecycleEnvelope {
        LifecycleEnvelope {
            event_id: "evt-1".to_string(),
            event_type: "lp.order.submitted".to_string(),
            event_version: 1,
            source: EventSource {
                kind: SourceKind::Lp,
                name: "lp-1".to_string(),
                adapter_version: "1.0".to_string(),
                server_id: "srv-1".to_string(),
                server_name: "primary".to_string(),
            },
            occurred_at: "2026-01-01T00:00:00Z".to_string(),
            ingested_at: "2026-01-01T00:00:01Z".to_string(),
            correlation: Correlation {
                trace_id: trace_id.to_string(),
                client_order_id: Some("CL-1".to_string()),
                lp_order_id: None,
                order_digest: order_digest.map(str::to_string),
                decision_token_id: None,
            },
            payload: json!({}),
            normalization: Normalization { status, reason: None },
            integrity: Integrity {
                payload_hash: "sha256:placeholder".to_string(),
                prev_event_hash: None,
                chain_id: String::new(),
            },
        }
    }

    #[test]
    fn trace_bundle_fails_closed_on_empty_trace() {
        let audit = AuditStore::new();
        let lifecycle = LifecycleStore::new();
        let service = ReconstructionService::new(&audit, &lifecycle);
        let err = service.trace_bundle("missing-trace").unwrap_err();
        assert_eq!(err, GateError::ReplayIntegrityFailure { broken_at: None });
    }

    #[test]
    fn trace_bundle_assembles_from_a_valid_chain() {
        let audit = AuditStore::new();
        audit
            .append("trace-1", "authorize.requested", 1, json!({"order": {}}), "2026-01-01T00:00:00Z")
            .unwrap();
        audit
            .append(
                "trace-1",
                "authorize.authorized",
                1,
                json!({"token": {"decision": "AUTHORIZED"}, "economics": {}}),
                "2026-01-01T00:00:01Z",
            )
            .unwrap();
        let lifecycle = LifecycleStore::new();
        let service = ReconstructionService::new(&audit, &lifecycle);
        let bundle = service.trace_bundle("trace-1").unwrap();
        assert!(bundle.integrity_verified);
        assert_eq!(bundle.summary.decision.as_deref(), Some("AUTHORIZED"));
    }

    #[test]
    fn evidence_pack_flags_tamper_when_lifecycle_digest_disagrees() {
        let audit = AuditStore::new();
        audit
            .append("trace-2", "authorize.requested", 1, json!({"order": {}}), "2026-01-01T00:00:00Z")
            .unwrap();
        audit
            .append(
                "trace-2",
                "authorize.authorized",
                1,
                json!({"token": {"policy_snapshot_hash": "deadbeefdeadbeef"}, "economics": {}}),
                "2026-01-01T00:00:01Z",
            )
            .unwrap();
        let lifecycle = LifecycleStore::new();
        let service = ReconstructionService::new(&audit, &lifecycle);
        let pack = service.evidence_pack("trace-2", json!({"operator": "system"})).unwrap();
        assert!(!pack.policy_consistent);
    }

    #[test]
    fn lp_timeline_flags_order_digest_mismatch_as_tamper_suspected() {
        let lifecycle = LifecycleStore::new();
        lifecycle.ingest(
            IdempotencyKey::new("LP", "lp.order.submitted", "evt-1"),
            lifecycle_envelope("trace-3", NormalizedStatus::Submitted, Some("digest-b")),
            1_000,
        );
        let audit = AuditStore::new();
        let service = ReconstructionService::new(&audit, &lifecycle);
        let timeline = service.lp_timeline("trace-3", Some("digest-a"), 10.0);
        assert!(matches!(timeline.entries[0].integrity_status, IntegrityStatus::TamperSuspected));
    }
}
