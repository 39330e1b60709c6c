//! Orchestration of the nine-step authorization pipeline (spec §4.1),
//! the direct generalization of `execution/pipeline.rs::evaluate_intent_pipeline`:
//! validate, append `authorize.requested`, evaluate policy, compute economics,
//! reserve a shadow-ledger hold, issue a decision token, append the terminal
//! decision event. Every dependency call is gated by its own
//! `CircuitBreaker` and fails the whole request closed to `BLOCKED` rather
//! than letting an error propagate past this boundary.

use crate::circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::health::Dependency;
use crate::signing::KeyedSigner;
use crate::store::audit_store::AuditStore;
use crate::store::ledger_store::{LedgerStore, LedgerStoreError};
use authgate_core::economics::{compute, EconomicsInput, EconomicsMetrics, EconomicsSnapshot};
use authgate_core::error::GateError;
use authgate_core::order::{compute_order_digest, validate_order, Order};
use authgate_core::policy::{evaluate, ExposureContext, PolicyBundle, PolicyDecision};
use authgate_core::token::{issue, Decision, DecisionToken, DecisionTokenPayload, Signer};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::{Duration as TimeDuration, OffsetDateTime};
use uuid::Uuid;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn micros(d: std::time::Duration) -> u64 {
    d.as_micros() as u64
}

/// An inbound authorize call (spec §4.1 "Input fields").
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub trace_id: Option<String>,
    pub client_id: String,
    pub order: Order,
    pub subject: String,
    pub audience: String,
    pub reference_price: Option<f64>,
}

/// Per-segment timings, in microseconds (spec §4.1 "Latency and timing").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentTimingsUs {
    pub parse_validate: u64,
    pub policy_decision: u64,
    pub economics: u64,
    pub token_sign: u64,
    pub audit_requested: u64,
    pub audit_decision: u64,
    pub total: u64,
}

/// The envelope returned to the caller (spec §4.1 step 9). Domain status is
/// always carried in the body — this type never corresponds to a
/// transport-level failure.
#[derive(Debug, Clone)]
pub struct AuthorizeResponse {
    pub trace_id: String,
    pub status: Decision,
    pub decision_token: Option<DecisionToken>,
    pub decision_signature: Option<String>,
    pub reason_code: Option<String>,
    pub rule_ids: Vec<String>,
    pub policy_version: Option<String>,
    pub economics: Option<EconomicsSnapshot>,
    pub timing_ms: SegmentTimingsUs,
    pub gate_note: Option<String>,
}

/// Dual-control vs. legacy single-operator override (spec §9 Open Question:
/// keep both; reject single-operator only under a future strict-mode flag
/// not yet wired to anything).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    SingleOperator,
    DualControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverrideStatus {
    Pending,
    Resolved,
}

#[derive(Debug, Clone)]
struct OverrideRecord {
    kind: OverrideKind,
    requested_by: String,
    status: OverrideStatus,
    resolution: Option<Decision>,
}

fn breaker_unavailable_error(dep: Dependency) -> GateError {
    match dep {
        Dependency::PolicyStore => GateError::GateUnavailable,
        Dependency::LedgerStore => GateError::StateUnavailable,
        Dependency::AuditStore => GateError::AuditUnavailable,
    }
}

/// The authorization gate: owns the audit log, shadow ledger, signing key,
/// active policy bundle, and one circuit breaker per dependency.
pub struct Gate {
    audit: AuditStore,
    ledger: LedgerStore,
    signer: Option<KeyedSigner>,
    policy_bundle: Mutex<Arc<PolicyBundle>>,
    breakers: Mutex<HashMap<Dependency, CircuitBreaker>>,
    overrides: Mutex<HashMap<String, OverrideRecord>>,
    economics_metrics: Mutex<EconomicsMetrics>,
    token_ttl_seconds: f64,
    strict_mode: bool,
}

impl Gate {
    pub fn new(
        policy_bundle: PolicyBundle,
        signer: Option<KeyedSigner>,
        audit: AuditStore,
        ledger: LedgerStore,
        breaker_config: BreakerConfig,
        token_ttl_seconds: f64,
    ) -> Self {
        let mut breakers = HashMap::new();
        breakers.insert(Dependency::PolicyStore, CircuitBreaker::new(breaker_config));
        breakers.insert(Dependency::LedgerStore, CircuitBreaker::new(breaker_config));
        breakers.insert(Dependency::AuditStore, CircuitBreaker::new(breaker_config));
        Self {
            audit,
            ledger,
            signer,
            policy_bundle: Mutex::new(Arc::new(policy_bundle)),
            breakers: Mutex::new(breakers),
            overrides: Mutex::new(HashMap::new()),
            economics_metrics: Mutex::new(EconomicsMetrics::new()),
            token_ttl_seconds,
            strict_mode: false,
        }
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn audit(&self) -> &AuditStore {
        &self.audit
    }

    /// Price-source counters accumulated across every `authorize` call
    /// (spec §4.8), for an operator dashboard to alarm on e.g. a rising
    /// `UNAVAILABLE` rate.
    pub fn with_economics_metrics<R>(&self, f: impl FnOnce(&EconomicsMetrics) -> R) -> R {
        f(&self.economics_metrics.lock().expect("economics metrics mutex poisoned"))
    }

    /// Atomic swap of the active policy bundle (spec §4.2 "Hot reload").
    /// Decisions made under the old bundle stay verifiable: the evidence
    /// pack embeds the snapshot content they were decided under.
    pub fn reload_policy_bundle(&self, bundle: PolicyBundle) {
        *self.policy_bundle.lock().expect("policy bundle mutex poisoned") = Arc::new(bundle);
    }

    /// Current breaker state per dependency, for `health::check_health`.
    pub fn breaker_states(&self) -> Vec<(Dependency, BreakerState)> {
        let breakers = self.breakers.lock().expect("gate breaker mutex poisoned");
        [Dependency::PolicyStore, Dependency::LedgerStore, Dependency::AuditStore]
            .into_iter()
            .map(|dep| (dep, breakers.get(&dep).expect("every dependency has a breaker").state()))
            .collect()
    }

    /// Test/ops hook: force a dependency's breaker open by feeding it enough
    /// synthetic failures to cross its own threshold. Used to exercise the
    /// fail-closed paths without a real backing failure.
    pub fn force_breaker_open(&self, dep: Dependency) {
        let mut breakers = self.breakers.lock().expect("gate breaker mutex poisoned");
        let breaker = breakers.get_mut(&dep).expect("every dependency has a breaker");
        let now = Instant::now();
        for _ in 0..8 {
            breaker.record_failure(now);
        }
    }

    fn breaker_precheck(&self, dep: Dependency) -> Result<(), GateError> {
        let now = Instant::now();
        let mut breakers = self.breakers.lock().expect("gate breaker mutex poisoned");
        let breaker = breakers.get_mut(&dep).expect("every dependency has a breaker");
        if breaker.allow_call(now) {
            Ok(())
        } else {
            tracing::warn!(dependency = dep.as_str(), "circuit breaker open, failing closed");
            Err(breaker_unavailable_error(dep))
        }
    }

    fn breaker_record(&self, dep: Dependency, success: bool) {
        let mut breakers = self.breakers.lock().expect("gate breaker mutex poisoned");
        let breaker = breakers.get_mut(&dep).expect("every dependency has a breaker");
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure(Instant::now());
            tracing::error!(dependency = dep.as_str(), "dependency call failed, recording breaker failure");
        }
    }

    fn blocked(
        &self,
        trace_id: String,
        error: GateError,
        timing_ms: SegmentTimingsUs,
        economics: Option<EconomicsSnapshot>,
    ) -> AuthorizeResponse {
        AuthorizeResponse {
            trace_id,
            status: Decision::Blocked,
            decision_token: None,
            decision_signature: None,
            reason_code: Some(error.reason_code().to_string()),
            rule_ids: Vec::new(),
            policy_version: None,
            economics,
            timing_ms,
            gate_note: Some(error.to_string()),
        }
    }

    /// `authorize` (spec §4.1 "Pipeline"). Never returns `Err` for a
    /// downstream failure — every dependency error is caught at this
    /// boundary and converted into a `BLOCKED` envelope.
    pub fn authorize(&self, request: AuthorizeRequest) -> AuthorizeResponse {
        let total_start = Instant::now();
        let trace_id = request.trace_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        // Step 2: schema validation.
        let parse_start = Instant::now();
        let validation = validate_order(&request.order);
        let parse_validate = micros(parse_start.elapsed());
        if let Err(err) = validation {
            let timing = SegmentTimingsUs {
                parse_validate,
                total: micros(total_start.elapsed()),
                ..Default::default()
            };
            return self.blocked(trace_id, err, timing, None);
        }

        let order_digest = compute_order_digest(&request.order);

        // Step 3: append `authorize.requested`.
        let audit_requested_start = Instant::now();
        let requested_result = if self.breaker_precheck(Dependency::AuditStore).is_ok() {
            let payload = json!({
                "order": request.order,
                "order_digest": order_digest,
                "client_id": request.client_id,
            });
            let outcome = self.audit.append(&trace_id, "authorize.requested", 1, payload, now_rfc3339());
            self.breaker_record(Dependency::AuditStore, outcome.is_ok());
            outcome.map_err(|_| GateError::AuditUnavailable)
        } else {
            Err(GateError::AuditUnavailable)
        };
        let audit_requested = micros(audit_requested_start.elapsed());
        if let Err(err) = requested_result {
            let timing = SegmentTimingsUs {
                parse_validate,
                audit_requested,
                total: micros(total_start.elapsed()),
                ..Default::default()
            };
            return self.blocked(trace_id, err, timing, None);
        }

        // Step 4: policy evaluation against current shadow-ledger exposure.
        let policy_decision_start = Instant::now();
        if let Err(err) = self.breaker_precheck(Dependency::PolicyStore) {
            let timing = SegmentTimingsUs {
                parse_validate,
                audit_requested,
                total: micros(total_start.elapsed()),
                ..Default::default()
            };
            return self.blocked(trace_id, err, timing, None);
        }
        let position = self.ledger.position(&request.client_id, &request.order.symbol);
        let exposure_context = ExposureContext {
            current_gross: position.gross_exposure,
            current_net: position.net_exposure,
            pending: position.pending_exposure,
        };
        let bundle = self.policy_bundle.lock().expect("policy bundle mutex poisoned").clone();
        let outcome = evaluate(&request.order, &exposure_context, &bundle);
        self.breaker_record(Dependency::PolicyStore, true);
        let policy_decision = micros(policy_decision_start.elapsed());

        // Step 5: snapshot economics.
        let economics_start = Instant::now();
        let economics_input = EconomicsInput {
            qty: request.order.qty as f64,
            price: request.order.price,
            reference_price: request.reference_price,
            decision: Decision::from(outcome.decision),
            exposure_pre: Some(position.gross_exposure),
            currency: "USD",
        };
        let mut economics = compute(&economics_input);
        self.economics_metrics
            .lock()
            .expect("economics metrics mutex poisoned")
            .record(economics.price_source);
        let economics_us = micros(economics_start.elapsed());

        // Step 6: reserve a hold on ALLOW, demoting to BLOCKED on a
        // concurrent breach policy didn't catch.
        let mut final_decision = outcome.decision;
        let mut reason_code = outcome.reason_code.clone();
        let mut rule_ids: Vec<String> = outcome.rule_id.clone().into_iter().collect();
        let mut reserved = false;

        if final_decision == PolicyDecision::Allow {
            match self.breaker_precheck(Dependency::LedgerStore) {
                Ok(()) => {
                    let notional = economics.notional.unwrap_or(0.0);
                    match self.ledger.reserve(
                        &trace_id,
                        &request.client_id,
                        &request.order.symbol,
                        request.order.side,
                        request.order.qty,
                        request.order.price,
                        notional,
                        OffsetDateTime::now_utc().unix_timestamp().max(0) as u64,
                    ) {
                        Ok(_) => {
                            self.breaker_record(Dependency::LedgerStore, true);
                            reserved = true;
                        }
                        Err(LedgerStoreError::Breach { breach, detail }) => {
                            self.breaker_record(Dependency::LedgerStore, true);
                            final_decision = PolicyDecision::Block;
                            reason_code = Some(breach.as_str().to_string());
                            rule_ids.clear();
                            let _ = detail;
                            economics = compute(&EconomicsInput {
                                decision: Decision::from(final_decision),
                                ..economics_input
                            });
                        }
                        Err(_) => {
                            self.breaker_record(Dependency::LedgerStore, false);
                            let timing = SegmentTimingsUs {
                                parse_validate,
                                audit_requested,
                                policy_decision,
                                economics: economics_us,
                                total: micros(total_start.elapsed()),
                                ..Default::default()
                            };
                            return self.blocked(trace_id, GateError::StateUnavailable, timing, Some(economics));
                        }
                    }
                }
                Err(err) => {
                    let timing = SegmentTimingsUs {
                        parse_validate,
                        audit_requested,
                        policy_decision,
                        economics: economics_us,
                        total: micros(total_start.elapsed()),
                        ..Default::default()
                    };
                    return self.blocked(trace_id, err, timing, Some(economics));
                }
            }
        }

        // Step 7: issue the decision token.
        let token_sign_start = Instant::now();
        let Some(signer) = self.signer.as_ref() else {
            if reserved {
                let _ = self.ledger.cancel(&trace_id);
            }
            let timing = SegmentTimingsUs {
                parse_validate,
                audit_requested,
                policy_decision,
                economics: economics_us,
                total: micros(total_start.elapsed()),
                ..Default::default()
            };
            return self.blocked(trace_id, GateError::SigningUnavailable, timing, Some(economics));
        };

        let issued_at_dt = OffsetDateTime::now_utc();
        let issued_at = issued_at_dt.format(&Rfc3339).unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
        let expires_at = (issued_at_dt + TimeDuration::seconds(self.token_ttl_seconds as i64))
            .format(&Rfc3339)
            .unwrap_or_else(|_| issued_at.clone());

        let decision: Decision = final_decision.into();
        let projected_exposure = economics.projected_exposure_delta.or(economics.saved_exposure);

        let payload = DecisionTokenPayload {
            trace_id: trace_id.clone(),
            decision,
            reason_code: reason_code.clone(),
            rule_ids: rule_ids.clone(),
            policy_snapshot_hash: outcome.policy_snapshot_hash.clone(),
            order_digest: order_digest.clone(),
            order: serde_json::to_value(&request.order).expect("Order always serializes"),
            subject: request.subject.clone(),
            audience: request.audience.clone(),
            issued_at,
            expires_at,
            nonce: Uuid::new_v4().to_string(),
            projected_exposure,
        };
        let token = issue(payload, signer as &dyn Signer);
        let token_sign = micros(token_sign_start.elapsed());

        // Step 8: append the terminal decision event.
        let audit_decision_start = Instant::now();
        let event_type = match decision {
            Decision::Authorized => "authorize.authorized",
            Decision::Blocked => "authorize.blocked",
        };
        let decision_payload = json!({
            "token": token.payload,
            "signature": token.signature,
            "algorithm": format!("{:?}", token.algorithm),
            "economics": economics,
            "policy_version": outcome.policy_version,
            "policy_snapshot": { "policyContent": bundle.canonical_content() },
        });
        let append_result = if self.breaker_precheck(Dependency::AuditStore).is_ok() {
            let outcome = self
                .audit
                .append(&trace_id, event_type, 1, decision_payload, now_rfc3339());
            self.breaker_record(Dependency::AuditStore, outcome.is_ok());
            outcome.map_err(|_| GateError::AuditUnavailable)
        } else {
            Err(GateError::AuditUnavailable)
        };
        let audit_decision = micros(audit_decision_start.elapsed());

        if let Err(err) = append_result {
            if reserved {
                let _ = self.ledger.cancel(&trace_id);
            }
            let timing = SegmentTimingsUs {
                parse_validate,
                audit_requested,
                policy_decision,
                economics: economics_us,
                token_sign,
                audit_decision,
                total: micros(total_start.elapsed()),
            };
            return self.blocked(trace_id, err, timing, Some(economics));
        }

        let timing_ms = SegmentTimingsUs {
            parse_validate,
            audit_requested,
            policy_decision,
            economics: economics_us,
            token_sign,
            audit_decision,
            total: micros(total_start.elapsed()),
        };

        AuthorizeResponse {
            trace_id,
            status: decision,
            decision_signature: Some(token.signature.clone()),
            decision_token: Some(token),
            reason_code,
            rule_ids,
            policy_version: Some(outcome.policy_version.clone()),
            economics: Some(economics),
            timing_ms,
            gate_note: None,
        }
    }

    /// Request a manual override for a trace (a human decision overlaid on
    /// an already-recorded gate decision). `DualControl` overrides require a
    /// different approver at resolution time; `SingleOperator` does not —
    /// both variants coexist until a future strict-mode flag forces
    /// dual-control only (spec §9 Open Question).
    pub fn submit_override(&self, trace_id: &str, requested_by: &str, kind: OverrideKind) -> Result<(), GateError> {
        let mut overrides = self.overrides.lock().expect("override mutex poisoned");
        if let Some(existing) = overrides.get(trace_id) {
            if existing.status == OverrideStatus::Pending {
                return Err(GateError::OverrideAlreadyPending);
            }
        }
        overrides.insert(
            trace_id.to_string(),
            OverrideRecord {
                kind,
                requested_by: requested_by.to_string(),
                status: OverrideStatus::Pending,
                resolution: None,
            },
        );
        Ok(())
    }

    /// Resolve a pending override. Rejects same-operator resolution for
    /// `DualControl` overrides, or for any override once `strict_mode` is
    /// enabled (not currently wired to any configuration surface).
    pub fn resolve_override(&self, trace_id: &str, approved_by: &str, decision: Decision) -> Result<(), GateError> {
        let mut overrides = self.overrides.lock().expect("override mutex poisoned");
        let record = overrides
            .get_mut(trace_id)
            .ok_or_else(|| GateError::StateConflict {
                detail: "no override pending for this trace".to_string(),
            })?;
        if record.status == OverrideStatus::Resolved {
            return Err(GateError::OverrideAlreadyResolved);
        }
        let requires_dual_control = self.strict_mode || matches!(record.kind, OverrideKind::DualControl);
        if requires_dual_control && record.requested_by == approved_by {
            return Err(GateError::DualControlViolation);
        }
        record.status = OverrideStatus::Resolved;
        record.resolution = Some(decision);

        let payload = json!({
            "trace_id": trace_id,
            "kind": format!("{:?}", record.kind),
            "requested_by": record.requested_by,
            "approved_by": approved_by,
            "decision": format!("{decision:?}"),
        });
        drop(overrides);
        let _ = self.audit.append(trace_id, "authorize.override", 1, payload, now_rfc3339());
        Ok(())
    }
}
