//! Error taxonomy for the authorization gate and its collaborators.
//!
//! Every variant here surfaces as a BLOCKED (or rejected) outcome at some
//! boundary; none of them are meant to unwind past `gate_service::authorize`.

use std::fmt;

/// Breach types returned by the shadow ledger, ordered the way `check`/`reserve`
/// evaluate them: `SINGLE_ORDER > GROSS_EXPOSURE > NET_EXPOSURE > SYMBOL_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreachType {
    SingleOrder,
    GrossExposure,
    NetExposure,
    SymbolLimit,
}

impl BreachType {
    pub fn as_str(self) -> &'static str {
        match self {
            BreachType::SingleOrder => "SINGLE_ORDER",
            BreachType::GrossExposure => "GROSS_EXPOSURE",
            BreachType::NetExposure => "NET_EXPOSURE",
            BreachType::SymbolLimit => "SYMBOL_LIMIT",
        }
    }
}

impl fmt::Display for BreachType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error/reason taxonomy (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    InvalidOrderSchema { detail: String },
    PolicyBlocked { rule_id: Option<String> },
    LimitBreach { breach: BreachType, detail: String },
    GateUnavailable,
    StateUnavailable,
    SigningUnavailable,
    AuditUnavailable,
    TokenExpired,
    InvalidSignature,
    DualControlViolation,
    OverrideAlreadyPending,
    OverrideAlreadyResolved,
    ReplayIntegrityFailure { broken_at: Option<String> },
    PolicyInconsistent,
    StateConflict { detail: String },
}

impl GateError {
    /// The stable `reason_code` carried on the wire (spec §3 decision token,
    /// §7 taxonomy).
    pub fn reason_code(&self) -> &'static str {
        match self {
            GateError::InvalidOrderSchema { .. } => "INVALID_ORDER_SCHEMA",
            GateError::PolicyBlocked { .. } => "POLICY_BLOCKED",
            GateError::LimitBreach { breach, .. } => breach.as_str(),
            GateError::GateUnavailable => "GATE_UNAVAILABLE",
            GateError::StateUnavailable => "STATE_UNAVAILABLE",
            GateError::SigningUnavailable => "SIGNING_UNAVAILABLE",
            GateError::AuditUnavailable => "AUDIT_UNAVAILABLE",
            GateError::TokenExpired => "TOKEN_EXPIRED",
            GateError::InvalidSignature => "INVALID_SIGNATURE",
            GateError::DualControlViolation => "DUAL_CONTROL_VIOLATION",
            GateError::OverrideAlreadyPending => "OVERRIDE_ALREADY_PENDING",
            GateError::OverrideAlreadyResolved => "OVERRIDE_ALREADY_RESOLVED",
            GateError::ReplayIntegrityFailure { .. } => "REPLAY_INTEGRITY_FAILURE",
            GateError::PolicyInconsistent => "POLICY_INCONSISTENT",
            GateError::StateConflict { .. } => "STATE_CONFLICT",
        }
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::InvalidOrderSchema { detail } => {
                write!(f, "invalid order schema: {detail}")
            }
            GateError::PolicyBlocked { rule_id } => match rule_id {
                Some(id) => write!(f, "policy blocked by rule {id}"),
                None => write!(f, "policy blocked"),
            },
            GateError::LimitBreach { breach, detail } => {
                write!(f, "limit breach {breach}: {detail}")
            }
            GateError::GateUnavailable => write!(f, "policy evaluator unreachable"),
            GateError::StateUnavailable => write!(f, "shadow ledger unavailable"),
            GateError::SigningUnavailable => write!(f, "signing material missing"),
            GateError::AuditUnavailable => write!(f, "audit log append failed"),
            GateError::TokenExpired => write!(f, "decision token expired"),
            GateError::InvalidSignature => write!(f, "decision token signature invalid"),
            GateError::DualControlViolation => {
                write!(f, "override approver must differ from requester")
            }
            GateError::OverrideAlreadyPending => write!(f, "override already pending"),
            GateError::OverrideAlreadyResolved => write!(f, "override already resolved"),
            GateError::ReplayIntegrityFailure { broken_at } => match broken_at {
                Some(id) => write!(f, "audit chain broken at {id}"),
                None => write!(f, "audit chain broken"),
            },
            GateError::PolicyInconsistent => {
                write!(f, "evidence pack policy hash disagrees with token")
            }
            GateError::StateConflict { detail } => write!(f, "state conflict: {detail}"),
        }
    }
}

impl std::error::Error for GateError {}
