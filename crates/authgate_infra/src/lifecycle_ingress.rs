//! I/O-backed lifecycle ingress (spec §4.6): wires the envelope schema and
//! state-machine primitives in `authgate_core::lifecycle` to the lifecycle
//! store, the shadow ledger (fill/cancel reconciliation), and the audit log.
//!
//! This is the direct generalization of `gate_service::Gate::authorize`'s
//! "validate -> apply -> record" shape to inbound execution/close/LP
//! envelopes instead of outbound orders: the envelope is always accepted
//! (spec §4.6 "never silently dropped, never reject the event"), violations
//! and tamper signals are flagged rather than hidden, and every accepted
//! envelope leaves behind both a materialized lifecycle record and an audit
//! event so the trail survives even when the transition itself was illegal.

use crate::store::audit_store::AuditStore;
use crate::store::ledger_store::{LedgerStore, LedgerStoreError};
use crate::store::lifecycle_store::{LifecycleIngestOutcome as StoreOutcome, LifecycleStore};
use authgate_core::idempotency::{IdempotencyKey, ProcessingResult, ReserveDecision};
use authgate_core::lifecycle::rejection::{normalize, RejectionReason};
use authgate_core::lifecycle::{
    compute_payload_hash, verify_order_digest, Correlation, EventSource, Integrity, LifecycleEnvelope, Normalization,
    NormalizedStatus,
};
use serde_json::{json, Value};

/// The four idempotency-key shapes named in spec §6 "Lifecycle ingress
/// endpoints". Each formats to the `event_id` component of the underlying
/// `(source_system, event_type, event_id)` key (spec §3 "Idempotency record").
#[derive(Debug, Clone)]
pub enum IngressKey {
    Execution { exec_id: String },
    Close { close_id: String },
    Reconciliation { trade_date: String, symbol: String, account_id: String },
    LpOrderEvent { event_id: String },
}

impl IngressKey {
    pub fn event_id(&self) -> String {
        match self {
            IngressKey::Execution { exec_id } => format!("exec:{exec_id}"),
            IngressKey::Close { close_id } => format!("close:{close_id}"),
            IngressKey::Reconciliation { trade_date, symbol, account_id } => {
                format!("recon:{trade_date}:{symbol}:{account_id}")
            }
            IngressKey::LpOrderEvent { event_id } => format!("g1:{event_id}"),
        }
    }
}

/// Raw rejection fields carried by a REJECTED envelope, before normalization
/// (spec §3 "Rejection reason").
#[derive(Debug, Clone)]
pub struct RawRejectionInput {
    pub provider_code: Option<String>,
    pub provider_message: Option<String>,
    pub provider_fields: Value,
}

/// Fill details carried by a FILLED/PARTIALLY_FILLED envelope, applied to the
/// shadow ledger as part of ingestion.
#[derive(Debug, Clone, Copy)]
pub struct FillDetails {
    pub fill_qty: u64,
    pub fill_price: f64,
}

/// One inbound lifecycle envelope, pre-parsed from the wire (spec §3
/// "Lifecycle event envelope"). `key` determines the idempotency-key shape;
/// `token_order_digest`, when present, is the order digest bound to the
/// decision token for this trace, used for tamper detection.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub key: IngressKey,
    pub source: EventSource,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: String,
    pub ingested_at: String,
    pub correlation: Correlation,
    pub payload: Value,
    pub status: NormalizedStatus,
    pub rejection: Option<RawRejectionInput>,
    pub fill: Option<FillDetails>,
    pub token_order_digest: Option<String>,
}

/// Outcome of a freshly-ingested envelope (spec §4.6 `ingest` contract, the
/// success branch).
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedResult {
    pub event_id: String,
    pub hash: String,
    pub prev_hash: Option<String>,
    pub warnings: Vec<String>,
    pub has_violations: bool,
    pub tamper_suspected: bool,
    pub ledger_error: Option<LedgerStoreError>,
}

/// Full response of `ingest` (spec §4.6 contract plus the duplicate/rejected
/// branches spec §4.5 and §6 describe for the surrounding endpoints).
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleIngestResponse {
    Processed(IngestedResult),
    Duplicate {
        payload_mismatch: bool,
        previous_result: Option<ProcessingResult>,
    },
    Rejected {
        reason: String,
    },
}

/// Wires `LifecycleStore` (envelope dedup + transition tracking),
/// `LedgerStore` (fill/cancel reconciliation), and `AuditStore` (the
/// permanent trail) into one ingress entry point.
pub struct LifecycleIngressService<'a> {
    lifecycle: &'a LifecycleStore,
    ledger: &'a LedgerStore,
    audit: &'a AuditStore,
}

impl<'a> LifecycleIngressService<'a> {
    pub fn new(lifecycle: &'a LifecycleStore, ledger: &'a LedgerStore, audit: &'a AuditStore) -> Self {
        Self { lifecycle, ledger, audit }
    }

    /// `ingest` (spec §4.6 contract). Rejects malformed envelopes with no
    /// hash-chain side effects; otherwise always accepts, flags rather than
    /// rejects illegal transitions and digest mismatches, reconciles the
    /// shadow ledger on FILLED/PARTIALLY_FILLED/CANCELED, and appends
    /// `lifecycle.ingested` to the trace's audit chain.
    pub fn ingest(&self, request: IngestRequest, now: u64, created_at: impl Into<String>) -> LifecycleIngestResponse {
        if request.correlation.trace_id.trim().is_empty() {
            return LifecycleIngestResponse::Rejected {
                reason: "correlation.trace_id must not be empty".to_string(),
            };
        }
        let event_id = request.key.event_id();
        if event_id.trim().is_empty() {
            return LifecycleIngestResponse::Rejected {
                reason: "idempotency key must not be empty".to_string(),
            };
        }

        let reason: Option<RejectionReason> = request.rejection.map(|raw| {
            normalize(
                request.source.kind,
                raw.provider_code.as_deref(),
                raw.provider_message.as_deref(),
                raw.provider_fields,
            )
        });
        let normalization = Normalization { status: request.status, reason };

        let payload_hash = compute_payload_hash(
            &event_id,
            &request.event_type,
            request.event_version,
            &request.source,
            &request.occurred_at,
            &request.ingested_at,
            &request.correlation,
            &request.payload,
            &normalization,
        );

        let envelope = LifecycleEnvelope {
            event_id: event_id.clone(),
            event_type: request.event_type.clone(),
            event_version: request.event_version,
            source: request.source.clone(),
            occurred_at: request.occurred_at,
            ingested_at: request.ingested_at,
            correlation: request.correlation,
            payload: request.payload,
            normalization,
            integrity: Integrity {
                payload_hash,
                prev_event_hash: None,
                chain_id: String::new(),
            },
        };

        let key = IdempotencyKey::new(request.source.kind.as_str(), request.event_type.clone(), event_id);
        match self.lifecycle.ingest(key, envelope, now) {
            StoreOutcome::Duplicate { idempotency } => {
                let (payload_mismatch, previous_result) = match idempotency.decision {
                    ReserveDecision::AlreadyProcessed { result, .. } => (false, Some(result)),
                    ReserveDecision::PayloadMismatch { result, .. } => (true, Some(result)),
                    ReserveDecision::ShouldProcess => (false, None),
                };
                LifecycleIngestResponse::Duplicate { payload_mismatch, previous_result }
            }
            StoreOutcome::Ingested { envelope, has_violations, warnings } => {
                let tamper_suspected = match (&envelope.correlation.order_digest, &request.token_order_digest) {
                    (Some(event_digest), Some(token_digest)) => {
                        !verify_order_digest(Some(event_digest.as_str()), token_digest)
                    }
                    _ => false,
                };

                let ledger_error = self.reconcile_ledger(&envelope, request.fill);
                self.append_audit(&envelope, has_violations, tamper_suspected, ledger_error.as_ref(), created_at);

                LifecycleIngestResponse::Processed(IngestedResult {
                    event_id: envelope.event_id,
                    hash: envelope.integrity.payload_hash,
                    prev_hash: envelope.integrity.prev_event_hash,
                    warnings,
                    has_violations,
                    tamper_suspected,
                    ledger_error,
                })
            }
        }
    }

    /// Apply the envelope's normalized status to the shadow ledger (spec
    /// §4.3 "Hold lifecycle"). A FILLED/PARTIALLY_FILLED envelope with no
    /// fill details attached (e.g. a late duplicate carrying only a status
    /// change) is a no-op here, not an error — reconciliation only happens
    /// once, on first sight, via `LifecycleStore`'s own dedup.
    fn reconcile_ledger(&self, envelope: &LifecycleEnvelope, fill: Option<FillDetails>) -> Option<LedgerStoreError> {
        match envelope.normalization.status {
            NormalizedStatus::Filled | NormalizedStatus::PartiallyFilled => fill.and_then(|f| {
                self.ledger
                    .settle_fill(&envelope.correlation.trace_id, f.fill_qty, f.fill_price)
                    .err()
            }),
            NormalizedStatus::Canceled => self.ledger.cancel(&envelope.correlation.trace_id).err(),
            _ => None,
        }
    }

    /// Append `lifecycle.ingested` to the trace's audit chain (spec Testable
    /// Property 7: an invalid transition is flagged AND an audit event is
    /// present, never just the former).
    fn append_audit(
        &self,
        envelope: &LifecycleEnvelope,
        has_violations: bool,
        tamper_suspected: bool,
        ledger_error: Option<&LedgerStoreError>,
        created_at: impl Into<String>,
    ) {
        let payload = json!({
            "event_id": envelope.event_id,
            "event_type": envelope.event_type,
            "source": envelope.source,
            "status": envelope.normalization.status,
            "reason": envelope.normalization.reason,
            "has_violations": has_violations,
            "tamper_suspected": tamper_suspected,
            "ledger_error": ledger_error.map(LedgerStoreError::reason_code),
            "payload_hash": envelope.integrity.payload_hash,
        });
        let _ = self.audit.append(&envelope.correlation.trace_id, "lifecycle.ingested", 1, payload, created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authgate_core::ledger::ClientLimits;
    use authgate_core::lifecycle::SourceKind;
    use authgate_core::order::Side;
    use std::collections::HashMap;

    fn source() -> EventSource {
        EventSource {
            kind: SourceKind::Lp,
            name: "lp-1".to_string(),
            adapter_version: "1.0".to_string(),
            server_id: "srv-1".to_string(),
            server_name: "primary".to_string(),
        }
    }

    fn correlation(trace_id: &str) -> Correlation {
        Correlation {
            trace_id: trace_id.to_string(),
            client_order_id: Some("CL-1".to_string()),
            lp_order_id: None,
            order_digest: None,
            decision_token_id: None,
        }
    }

    fn request(key: IngressKey, trace_id: &str, status: NormalizedStatus, fill: Option<FillDetails>) -> IngestRequest {
        IngestRequest {
            key,
            source: source(),
            event_type: "lp.order.submitted".to_string(),
            event_version: 1,
            occurred_at: "2026-01-01T00:00:00Z".to_string(),
            ingested_at: "2026-01-01T00:00:01Z".to_string(),
            correlation: correlation(trace_id),
            payload: json!({}),
            status,
            rejection: None,
            fill,
            token_order_digest: None,
        }
    }

    fn limits() -> ClientLimits {
        ClientLimits {
            max_gross: 1_000_000.0,
            max_net: 500_000.0,
            max_single_order: 100_000.0,
            per_symbol: HashMap::new(),
        }
    }

    #[test]
    fn duplicate_execution_event_settles_the_ledger_exactly_once() {
        let lifecycle = LifecycleStore::new();
        let ledger = LedgerStore::new();
        let audit = AuditStore::new();
        ledger.set_limits("c1", limits());
        ledger
            .reserve("trace-1", "c1", "AAPL", Side::Buy, 100, Some(185.50), 18_550.0, 0)
            .unwrap();

        let service = LifecycleIngressService::new(&lifecycle, &ledger, &audit);
        let fill = Some(FillDetails { fill_qty: 100, fill_price: 185.60 });

        let first = service.ingest(
            request(IngressKey::Execution { exec_id: "EX-1".to_string() }, "trace-1", NormalizedStatus::Filled, fill),
            1_000,
            "2026-01-01T00:00:02Z",
        );
        assert!(matches!(first, LifecycleIngestResponse::Processed(IngestedResult { ledger_error: None, .. })));

        let second = service.ingest(
            request(IngressKey::Execution { exec_id: "EX-1".to_string() }, "trace-1", NormalizedStatus::Filled, fill),
            1_010,
            "2026-01-01T00:00:03Z",
        );
        assert!(matches!(
            second,
            LifecycleIngestResponse::Duplicate { previous_result: Some(ProcessingResult::Success), .. }
        ));
        // exactly one fill event landed on the exposure chain
        assert_eq!(ledger.exposure_events("c1").len(), 2); // reserve + fill
    }

    #[test]
    fn late_fill_after_expiry_is_a_state_conflict() {
        let lifecycle = LifecycleStore::new();
        let ledger = LedgerStore::new();
        let audit = AuditStore::new();
        ledger.set_limits("c1", limits());
        ledger
            .reserve("trace-2", "c1", "AAPL", Side::Buy, 100, Some(185.50), 18_550.0, 0)
            .unwrap();
        ledger.expire_stale_holds(300, 301);

        let service = LifecycleIngressService::new(&lifecycle, &ledger, &audit);
        let fill = Some(FillDetails { fill_qty: 100, fill_price: 185.60 });
        let response = service.ingest(
            request(IngressKey::Execution { exec_id: "EX-2".to_string() }, "trace-2", NormalizedStatus::Filled, fill),
            1_000,
            "2026-01-01T00:05:00Z",
        );
        match response {
            LifecycleIngestResponse::Processed(result) => {
                assert!(matches!(result.ledger_error, Some(LedgerStoreError::StateConflict { .. })));
            }
            other => panic!("expected Processed with a state conflict, got {other:?}"),
        }
    }

    #[test]
    fn invalid_transition_is_ingested_and_leaves_an_audit_event() {
        let lifecycle = LifecycleStore::new();
        let ledger = LedgerStore::new();
        let audit = AuditStore::new();
        let service = LifecycleIngressService::new(&lifecycle, &ledger, &audit);

        service.ingest(
            request(IngressKey::LpOrderEvent { event_id: "evt-1".to_string() }, "trace-3", NormalizedStatus::Rejected, None),
            1_000,
            "2026-01-01T00:00:00Z",
        );
        let response = service.ingest(
            request(IngressKey::LpOrderEvent { event_id: "evt-2".to_string() }, "trace-3", NormalizedStatus::Filled, None),
            1_010,
            "2026-01-01T00:00:01Z",
        );

        match response {
            LifecycleIngestResponse::Processed(result) => assert!(result.has_violations),
            other => panic!("expected Processed, got {other:?}"),
        }
        let events = audit.read("trace-3");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "lifecycle.ingested");
    }

    #[test]
    fn order_digest_mismatch_flags_tamper_suspected() {
        let lifecycle = LifecycleStore::new();
        let ledger = LedgerStore::new();
        let audit = AuditStore::new();
        let service = LifecycleIngressService::new(&lifecycle, &ledger, &audit);

        let mut req = request(IngressKey::LpOrderEvent { event_id: "evt-1".to_string() }, "trace-4", NormalizedStatus::Submitted, None);
        req.correlation.order_digest = Some("digest-b".to_string());
        req.token_order_digest = Some("digest-a".to_string());

        let response = service.ingest(req, 1_000, "2026-01-01T00:00:00Z");
        match response {
            LifecycleIngestResponse::Processed(result) => assert!(result.tamper_suspected),
            other => panic!("expected Processed, got {other:?}"),
        }
    }

    #[test]
    fn rejected_envelope_carries_a_normalized_reason() {
        let lifecycle = LifecycleStore::new();
        let ledger = LedgerStore::new();
        let audit = AuditStore::new();
        let service = LifecycleIngressService::new(&lifecycle, &ledger, &audit);

        let mut req = request(IngressKey::LpOrderEvent { event_id: "evt-1".to_string() }, "trace-5", NormalizedStatus::Rejected, None);
        req.rejection = Some(RawRejectionInput {
            provider_code: Some("INSUFFICIENT_MARGIN".to_string()),
            provider_message: None,
            provider_fields: json!({}),
        });

        let response = service.ingest(req, 1_000, "2026-01-01T00:00:00Z");
        assert!(matches!(response, LifecycleIngestResponse::Processed(_)));
        let events = audit.read("trace-5");
        let reason = &events[0].payload["reason"];
        assert_eq!(reason["reason_code"], "LP_MARGIN_INSUFFICIENT");
    }

    #[test]
    fn empty_trace_id_is_rejected_with_no_side_effects() {
        let lifecycle = LifecycleStore::new();
        let ledger = LedgerStore::new();
        let audit = AuditStore::new();
        let service = LifecycleIngressService::new(&lifecycle, &ledger, &audit);

        let mut req = request(IngressKey::LpOrderEvent { event_id: "evt-1".to_string() }, "", NormalizedStatus::Submitted, None);
        req.correlation.trace_id = String::new();
        let response = service.ingest(req, 1_000, "2026-01-01T00:00:00Z");
        assert!(matches!(response, LifecycleIngestResponse::Rejected { .. }));
        assert!(audit.read("").is_empty());
    }

    #[test]
    fn reconciliation_key_formats_match_spec() {
        assert_eq!(IngressKey::Execution { exec_id: "EX-1".to_string() }.event_id(), "exec:EX-1");
        assert_eq!(IngressKey::Close { close_id: "CL-1".to_string() }.event_id(), "close:CL-1");
        assert_eq!(
            IngressKey::Reconciliation {
                trade_date: "2026-01-01".to_string(),
                symbol: "AAPL".to_string(),
                account_id: "ACC-1".to_string(),
            }
            .event_id(),
            "recon:2026-01-01:AAPL:ACC-1"
        );
        assert_eq!(IngressKey::LpOrderEvent { event_id: "evt-1".to_string() }.event_id(), "g1:evt-1");
    }
}
