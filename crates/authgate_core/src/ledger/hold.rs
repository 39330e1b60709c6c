//! Hold lifecycle and the per-client exposure-event hash chain (spec §4.3).

use crate::audit::sha256_hex_concat;
use crate::order::Side;

/// Kinds of exposure events (spec §3 "Exposure event").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExposureEventKind {
    Authorized,
    Blocked,
    Filled,
    Cancelled,
    Expired,
    PositionClosed,
}

/// An append-only, per-client hash-chained exposure event.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExposureEvent {
    pub trace_id: String,
    pub client_id: String,
    pub symbol: String,
    pub kind: ExposureEventKind,
    pub side: Option<Side>,
    pub qty: Option<u64>,
    pub price: Option<f64>,
    pub delta: f64,
    pub exposure_before: Option<f64>,
    pub exposure_after: Option<f64>,
    pub prev_hash: Option<String>,
    pub hash: String,
}

/// `hash = SHA256(prev_hash | trace_id | client_id | symbol | delta)`.
pub fn compute_exposure_hash(
    prev_hash: Option<&str>,
    trace_id: &str,
    client_id: &str,
    symbol: &str,
    delta: f64,
) -> String {
    let prev = prev_hash.unwrap_or("");
    let delta_repr = format!("{delta:.8}");
    sha256_hex_concat(&[
        prev.as_bytes(),
        b"|",
        trace_id.as_bytes(),
        b"|",
        client_id.as_bytes(),
        b"|",
        symbol.as_bytes(),
        b"|",
        delta_repr.as_bytes(),
    ])
}

#[allow(clippy::too_many_arguments)]
pub fn build_exposure_event(
    trace_id: impl Into<String>,
    client_id: impl Into<String>,
    symbol: impl Into<String>,
    kind: ExposureEventKind,
    side: Option<Side>,
    qty: Option<u64>,
    price: Option<f64>,
    delta: f64,
    exposure_before: Option<f64>,
    exposure_after: Option<f64>,
    predecessor: Option<&ExposureEvent>,
) -> ExposureEvent {
    let trace_id = trace_id.into();
    let client_id = client_id.into();
    let symbol = symbol.into();
    let prev_hash = predecessor.map(|e| e.hash.clone());
    let hash = compute_exposure_hash(prev_hash.as_deref(), &trace_id, &client_id, &symbol, delta);
    ExposureEvent {
        trace_id,
        client_id,
        symbol,
        kind,
        side,
        qty,
        price,
        delta,
        exposure_before,
        exposure_after,
        prev_hash,
        hash,
    }
}

/// Hold lifecycle states (spec §4.3 "Hold lifecycle" table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    AuthorizedHold,
    Executed,
    Expired,
    Canceled,
    Closed,
}

impl HoldState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HoldState::Expired | HoldState::Canceled | HoldState::Closed)
    }
}

/// Events that drive hold transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEvent {
    Fill,
    Expire,
    Cancel,
    PositionZero,
}

/// A rejected transition: the hold was already in a terminal state that
/// conflicts with the incoming event (spec §4.3 "Expiry sweeper": a late
/// FILL against an already-EXPIRED trace must be rejected, never silently
/// dropped and never mutate history).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldStateConflict {
    pub from: HoldState,
    pub event: HoldEvent,
}

/// Apply a hold-lifecycle event. Returns the new state and the pending-notional
/// delta to apply (always `-notional` on a terminating event, since pending
/// only ever decreases once a hold is opened), or a conflict if the hold is
/// already in an incompatible terminal state.
pub fn apply_hold_event(
    from: HoldState,
    event: HoldEvent,
    notional: f64,
) -> Result<(HoldState, f64), HoldStateConflict> {
    match (from, event) {
        (HoldState::AuthorizedHold, HoldEvent::Fill) => Ok((HoldState::Executed, -notional)),
        (HoldState::AuthorizedHold, HoldEvent::Expire) => Ok((HoldState::Expired, -notional)),
        (HoldState::AuthorizedHold, HoldEvent::Cancel) => Ok((HoldState::Canceled, -notional)),
        (HoldState::Executed, HoldEvent::PositionZero) => Ok((HoldState::Closed, 0.0)),
        // A FILL observing EXPIRED, or an expiry sweep observing EXECUTED,
        // must no-op rather than mutate history — surfaced here as a
        // conflict so the caller can answer STATE_CONFLICT.
        (from, event) => Err(HoldStateConflict { from, event }),
    }
}
