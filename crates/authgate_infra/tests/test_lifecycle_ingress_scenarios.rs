//! Lifecycle ingress wired end to end against a real `authorize` call: an
//! execution event reconciles the shadow ledger hold that `Gate::authorize`
//! reserved, and the resulting trail is both materialized (`LifecycleStore`)
//! and durable (`AuditStore`) for later reconstruction.

use authgate_core::ledger::ClientLimits;
use authgate_core::lifecycle::{Correlation, EventSource, NormalizedStatus, SourceKind};
use authgate_core::order::{Order, Side};
use authgate_core::policy::default_allow_bundle;
use authgate_core::token::Decision;
use authgate_infra::circuit_breaker::BreakerConfig;
use authgate_infra::gate_service::{AuthorizeRequest, Gate};
use authgate_infra::lifecycle_ingress::{FillDetails, IngestRequest, IngressKey, LifecycleIngestResponse, LifecycleIngressService};
use authgate_infra::reconstruction_service::ReconstructionService;
use authgate_infra::signing::KeyedSigner;
use authgate_infra::store::ledger_store::LedgerStore;
use authgate_infra::store::lifecycle_store::LifecycleStore;
use authgate_infra::store::audit_store::AuditStore;
use serde_json::json;
use std::time::Duration;

fn breaker_config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 5,
        failure_window: Duration::from_secs(30),
        reset_timeout: Duration::from_secs(60),
        reset_successes: 3,
    }
}

fn source() -> EventSource {
    EventSource {
        kind: SourceKind::Lp,
        name: "lp-primary".to_string(),
        adapter_version: "1.2.0".to_string(),
        server_id: "srv-1".to_string(),
        server_name: "primary".to_string(),
    }
}

fn gate() -> Gate {
    let audit = AuditStore::new();
    let ledger = LedgerStore::new();
    ledger.set_limits(
        "client-1",
        ClientLimits {
            max_gross: 1_000_000.0,
            max_net: 500_000.0,
            max_single_order: 100_000.0,
            per_symbol: Default::default(),
        },
    );
    Gate::new(
        default_allow_bundle("v1"),
        Some(KeyedSigner::new("lifecycle-ingress-test-key")),
        audit,
        ledger,
        breaker_config(),
        300.0,
    )
}

/// End-to-end scenario 4 (spec §8): a duplicate execution event settles the
/// shadow-ledger hold exactly once.
#[test]
fn duplicate_execution_event_reconciles_the_gate_hold_exactly_once() {
    let gate = gate();
    let response = gate.authorize(AuthorizeRequest {
        trace_id: Some("trace-exec".to_string()),
        client_id: "client-1".to_string(),
        order: Order {
            client_order_id: "ORDER-001".to_string(),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            qty: 100,
            price: Some(185.50),
        },
        subject: "client-1".to_string(),
        audience: "execution-venue".to_string(),
        reference_price: None,
    });
    assert_eq!(response.status, Decision::Authorized);
    assert_eq!(gate.ledger().position("client-1", "AAPL").pending_exposure, 18_550.0);

    let lifecycle = LifecycleStore::new();
    let ingress = LifecycleIngressService::new(&lifecycle, gate.ledger(), gate.audit());

    let envelope = |event_id: &str| IngestRequest {
        key: IngressKey::Execution { exec_id: event_id.to_string() },
        source: source(),
        event_type: "platform.execution".to_string(),
        event_version: 1,
        occurred_at: "2026-01-01T00:00:02Z".to_string(),
        ingested_at: "2026-01-01T00:00:03Z".to_string(),
        correlation: Correlation {
            trace_id: "trace-exec".to_string(),
            client_order_id: Some("ORDER-001".to_string()),
            lp_order_id: None,
            order_digest: None,
            decision_token_id: None,
        },
        payload: json!({"fill_qty": 100, "fill_price": 185.60}),
        status: NormalizedStatus::Filled,
        rejection: None,
        fill: Some(FillDetails { fill_qty: 100, fill_price: 185.60 }),
        token_order_digest: None,
    };

    let first = ingress.ingest(envelope("EX-1"), 1_000, "2026-01-01T00:00:04Z");
    assert!(matches!(first, LifecycleIngestResponse::Processed(_)));
    assert_eq!(gate.ledger().position("client-1", "AAPL").pending_exposure, 0.0);

    let second = ingress.ingest(envelope("EX-1"), 1_010, "2026-01-01T00:00:05Z");
    assert!(matches!(second, LifecycleIngestResponse::Duplicate { .. }));
    // net exposure only reflects one fill, not two
    assert_eq!(gate.ledger().position("client-1", "AAPL").net_exposure, 18_560.0);
}

/// End-to-end scenario 5 (spec §8): an invalid lifecycle transition is
/// ingested, flagged, and still reconstructible via `lp_timeline`.
#[test]
fn invalid_transition_surfaces_in_the_timeline_with_violations_flagged() {
    let gate = gate();
    gate.authorize(AuthorizeRequest {
        trace_id: Some("trace-timeline".to_string()),
        client_id: "client-1".to_string(),
        order: Order {
            client_order_id: "ORDER-002".to_string(),
            symbol: "MSFT".to_string(),
            side: Side::Buy,
            qty: 50,
            price: Some(300.0),
        },
        subject: "client-1".to_string(),
        audience: "execution-venue".to_string(),
        reference_price: None,
    });

    let lifecycle = LifecycleStore::new();
    let ingress = LifecycleIngressService::new(&lifecycle, gate.ledger(), gate.audit());

    let base = |status: NormalizedStatus, event_id: &str| IngestRequest {
        key: IngressKey::LpOrderEvent { event_id: event_id.to_string() },
        source: source(),
        event_type: "lp.order.event".to_string(),
        event_version: 1,
        occurred_at: "2026-01-01T00:00:10Z".to_string(),
        ingested_at: "2026-01-01T00:00:11Z".to_string(),
        correlation: Correlation {
            trace_id: "trace-timeline".to_string(),
            client_order_id: Some("ORDER-002".to_string()),
            lp_order_id: None,
            order_digest: None,
            decision_token_id: None,
        },
        payload: json!({}),
        status,
        rejection: None,
        fill: None,
        token_order_digest: None,
    };

    ingress.ingest(base(NormalizedStatus::Rejected, "evt-1"), 1_000, "2026-01-01T00:00:12Z");
    let outcome = ingress.ingest(base(NormalizedStatus::Filled, "evt-2"), 1_010, "2026-01-01T00:00:13Z");
    match outcome {
        LifecycleIngestResponse::Processed(result) => assert!(result.has_violations),
        other => panic!("expected Processed, got {other:?}"),
    }

    let reconstruction = ReconstructionService::new(gate.audit(), &lifecycle);
    let timeline = reconstruction.lp_timeline("trace-timeline", None, 50.0);
    assert!(timeline.entries.iter().any(|e| e.has_violations));
    assert_eq!(timeline.current_status, NormalizedStatus::Filled);
}
