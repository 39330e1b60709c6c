//! End-to-end scenarios through `Gate::authorize` and the expiry sweeper,
//! exercised against the crate's public API rather than any internal
//! module, the way a caller wired up behind the execution venue would see
//! them.

use authgate_core::ledger::ClientLimits;
use authgate_core::order::{Order, Side};
use authgate_core::policy::default_allow_bundle;
use authgate_core::token::Decision;
use authgate_infra::circuit_breaker::BreakerConfig;
use authgate_infra::gate_service::{AuthorizeRequest, Gate};
use authgate_infra::signing::KeyedSigner;
use authgate_infra::store::audit_store::AuditStore;
use authgate_infra::store::ledger_store::LedgerStore;
use std::time::Duration;

fn breaker_config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 5,
        failure_window: Duration::from_secs(30),
        reset_timeout: Duration::from_secs(60),
        reset_successes: 3,
    }
}

fn gate() -> Gate {
    Gate::new(
        default_allow_bundle("v1"),
        Some(KeyedSigner::new("integration-test-key")),
        AuditStore::new(),
        LedgerStore::new(),
        breaker_config(),
        300.0,
    )
}

fn limit_order() -> Order {
    Order {
        client_order_id: "ORDER-001".to_string(),
        symbol: "AAPL".to_string(),
        side: Side::Buy,
        qty: 100,
        price: Some(185.50),
    }
}

#[test]
fn authorized_limit_order_reserves_notional_and_issues_a_token() {
    let gate = gate();
    gate.ledger().set_limits(
        "client-1",
        ClientLimits {
            max_gross: 1_000_000.0,
            max_net: 500_000.0,
            max_single_order: 100_000.0,
            per_symbol: Default::default(),
        },
    );

    let response = gate.authorize(AuthorizeRequest {
        trace_id: Some("trace-authorized".to_string()),
        client_id: "client-1".to_string(),
        order: limit_order(),
        subject: "client-1".to_string(),
        audience: "execution-venue".to_string(),
        reference_price: None,
    });

    assert_eq!(response.status, Decision::Authorized);
    let economics = response.economics.expect("economics present on authorized decision");
    assert_eq!(economics.notional, Some(18_550.0));
    assert!(response.decision_token.is_some());

    let position = gate.ledger().position("client-1", "AAPL");
    assert_eq!(position.pending_exposure, 18_550.0);
}

#[test]
fn gross_breach_blocks_with_no_ledger_mutation() {
    let gate = gate();
    gate.ledger().set_limits(
        "client-1",
        ClientLimits {
            max_gross: 10_000.0,
            max_net: 500_000.0,
            max_single_order: 100_000.0,
            per_symbol: Default::default(),
        },
    );

    let response = gate.authorize(AuthorizeRequest {
        trace_id: Some("trace-breach".to_string()),
        client_id: "client-1".to_string(),
        order: limit_order(),
        subject: "client-1".to_string(),
        audience: "execution-venue".to_string(),
        reference_price: None,
    });

    assert_eq!(response.status, Decision::Blocked);
    assert_eq!(response.reason_code.as_deref(), Some("GROSS_EXPOSURE"));
    let economics = response.economics.expect("economics present on blocked decision");
    assert_eq!(economics.saved_exposure, Some(18_550.0));

    let position = gate.ledger().position("client-1", "AAPL");
    assert_eq!(position.pending_exposure, 0.0);
}

#[test]
fn hold_expiry_then_late_fill_reports_state_conflict() {
    let gate = gate();
    gate.ledger().set_limits(
        "client-1",
        ClientLimits {
            max_gross: 1_000_000.0,
            max_net: 500_000.0,
            max_single_order: 100_000.0,
            per_symbol: Default::default(),
        },
    );

    let response = gate.authorize(AuthorizeRequest {
        trace_id: Some("trace-expiry".to_string()),
        client_id: "client-1".to_string(),
        order: limit_order(),
        subject: "client-1".to_string(),
        audience: "execution-venue".to_string(),
        reference_price: None,
    });
    assert_eq!(response.status, Decision::Authorized);

    let expired = gate.ledger().expire_stale_holds(0, 1_000_000);
    assert_eq!(expired, vec!["trace-expiry".to_string()]);

    let position = gate.ledger().position("client-1", "AAPL");
    assert_eq!(position.pending_exposure, 0.0);

    let late_fill = gate.ledger().settle_fill("trace-expiry", 100, 185.60);
    assert!(late_fill.is_err());
}
