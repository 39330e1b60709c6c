//! Shadow-ledger store: per-`(client_id, symbol)` positions, holds, and the
//! per-client exposure-event hash chain (spec §4.3).
//!
//! A single mutex guards the whole map rather than a per-key lock —
//! simpler than a sharded-lock map and still gives the linearizability the
//! spec requires (§5 "per-client critical section... or equivalent
//! transactional serialization"), the same posture
//! `risk::pending_exposure::PendingExposureBook` takes with its own
//! single-book mutex rather than reaching for a lock-striping crate.

use authgate_core::error::BreachType;
use authgate_core::ledger::{
    apply_hold_event, build_exposure_event, check_breach, CheckResult, ClientLimits, ExposureEvent,
    ExposureEventKind, HoldEvent, HoldState, Position,
};
use authgate_core::order::Side;
use std::collections::HashMap;
use std::sync::Mutex;

/// Error surfaced by `reserve`/`settle_fill`/`cancel` (spec §4.3, §7
/// `LIMIT_BREACH`, `STATE_CONFLICT`).
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerStoreError {
    Breach { breach: BreachType, detail: String },
    StateConflict { detail: String },
    UnknownTrace,
}

impl std::fmt::Display for LedgerStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breach { breach, detail } => write!(f, "limit breach {breach}: {detail}"),
            Self::StateConflict { detail } => write!(f, "state conflict: {detail}"),
            Self::UnknownTrace => write!(f, "no hold recorded for this trace"),
        }
    }
}

impl std::error::Error for LedgerStoreError {}

impl LedgerStoreError {
    /// The stable `reason_code` carried on the wire (spec §7 taxonomy) for
    /// this ledger-level failure.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Breach { breach, .. } => breach.as_str(),
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::UnknownTrace => "UNKNOWN_TRACE",
        }
    }
}

/// A single authorized hold (spec §4.3 "Hold lifecycle").
#[derive(Debug, Clone, PartialEq)]
struct HoldRecord {
    client_id: String,
    symbol: String,
    side: Side,
    qty: u64,
    price: Option<f64>,
    notional: f64,
    state: HoldState,
    opened_at: u64,
}

#[derive(Debug, Default)]
pub struct LedgerStoreMetrics {
    reserves_total: u64,
    breaches_total: u64,
    fills_total: u64,
    cancels_total: u64,
    expiries_total: u64,
    state_conflicts_total: u64,
}

impl LedgerStoreMetrics {
    pub fn reserves_total(&self) -> u64 {
        self.reserves_total
    }
    pub fn breaches_total(&self) -> u64 {
        self.breaches_total
    }
    pub fn fills_total(&self) -> u64 {
        self.fills_total
    }
    pub fn cancels_total(&self) -> u64 {
        self.cancels_total
    }
    pub fn expiries_total(&self) -> u64 {
        self.expiries_total
    }
    pub fn state_conflicts_total(&self) -> u64 {
        self.state_conflicts_total
    }
}

struct State {
    positions: HashMap<(String, String), Position>,
    limits: HashMap<String, ClientLimits>,
    holds: HashMap<String, HoldRecord>,
    exposure_chain_tail: HashMap<String, ExposureEvent>,
    exposure_events: HashMap<String, Vec<ExposureEvent>>,
    metrics: LedgerStoreMetrics,
}

pub struct LedgerStore {
    inner: Mutex<State>,
}

/// Outcome of a successful `reserve` (spec §4.3 `reserve` contract).
#[derive(Debug, Clone, PartialEq)]
pub struct ReserveOutcome {
    pub exposure_event: ExposureEvent,
    pub pending_total: f64,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State {
                positions: HashMap::new(),
                limits: HashMap::new(),
                holds: HashMap::new(),
                exposure_chain_tail: HashMap::new(),
                exposure_events: HashMap::new(),
                metrics: LedgerStoreMetrics::default(),
            }),
        }
    }

    /// Administrative: (re)configure a client's limits. Limits outlive
    /// individual orders and are never derived from exposure activity
    /// (spec §3 "Ownership and lifecycle").
    pub fn set_limits(&self, client_id: impl Into<String>, limits: ClientLimits) {
        let mut state = self.inner.lock().expect("ledger store mutex poisoned");
        state.limits.insert(client_id.into(), limits);
    }

    /// `check` (spec §4.3 contract): evaluate breach order without mutating
    /// state.
    pub fn check(&self, client_id: &str, symbol: &str, projected_notional: f64) -> CheckResult {
        let state = self.inner.lock().expect("ledger store mutex poisoned");
        self.check_locked(&state, client_id, symbol, projected_notional)
    }

    fn check_locked(&self, state: &State, client_id: &str, symbol: &str, projected_notional: f64) -> CheckResult {
        let position = state
            .positions
            .get(&(client_id.to_string(), symbol.to_string()))
            .copied()
            .unwrap_or_default();
        let limits = state.limits.get(client_id).cloned().unwrap_or(ClientLimits {
            max_gross: 0.0,
            max_net: 0.0,
            max_single_order: 0.0,
            per_symbol: HashMap::new(),
        });
        check_breach(&position, &limits, symbol, projected_notional)
    }

    /// `reserve` (spec §4.3 contract): atomic check-then-reserve. On a
    /// breach, no ledger mutation occurs and no exposure event is appended
    /// (spec end-to-end scenario 2: "no ledger mutation").
    #[allow(clippy::too_many_arguments)]
    pub fn reserve(
        &self,
        trace_id: &str,
        client_id: &str,
        symbol: &str,
        side: Side,
        qty: u64,
        price: Option<f64>,
        notional: f64,
        now: u64,
    ) -> Result<ReserveOutcome, LedgerStoreError> {
        let mut state = self.inner.lock().expect("ledger store mutex poisoned");
        let check = self.check_locked(&state, client_id, symbol, notional);
        if !check.allowed {
            state.metrics.breaches_total += 1;
            let breach = check.breach.expect("disallowed check always carries a breach type");
            let detail = check.breach_detail.unwrap_or_default();
            return Err(LedgerStoreError::Breach { breach, detail });
        }

        let key = (client_id.to_string(), symbol.to_string());
        let position = state.positions.entry(key).or_default();
        let exposure_before = position.gross_exposure;
        position.pending_exposure += notional;
        let exposure_after = position.gross_exposure;

        let predecessor = state.exposure_chain_tail.get(client_id).cloned();
        let event = build_exposure_event(
            trace_id,
            client_id,
            symbol,
            ExposureEventKind::Authorized,
            Some(side),
            Some(qty),
            price,
            notional,
            Some(exposure_before),
            Some(exposure_after),
            predecessor.as_ref(),
        );
        state.exposure_chain_tail.insert(client_id.to_string(), event.clone());
        state
            .exposure_events
            .entry(client_id.to_string())
            .or_default()
            .push(event.clone());

        state.holds.insert(
            trace_id.to_string(),
            HoldRecord {
                client_id: client_id.to_string(),
                symbol: symbol.to_string(),
                side,
                qty,
                price,
                notional,
                state: HoldState::AuthorizedHold,
                opened_at: now,
            },
        );
        state.metrics.reserves_total += 1;

        Ok(ReserveOutcome {
            exposure_event: event,
            pending_total: position.pending_exposure,
        })
    }

    /// `settle_fill` (spec §4.3 contract): transitions `AUTHORIZED_HOLD ->
    /// EXECUTED`, reversing pending and updating gross/net from the fill. A
    /// fill referring to an already-expired (or otherwise terminal) hold is
    /// rejected with `STATE_CONFLICT` (spec §4.3 "Expiry sweeper").
    pub fn settle_fill(&self, trace_id: &str, fill_qty: u64, fill_price: f64) -> Result<ExposureEvent, LedgerStoreError> {
        let mut state = self.inner.lock().expect("ledger store mutex poisoned");
        let hold = state
            .holds
            .get(trace_id)
            .cloned()
            .ok_or(LedgerStoreError::UnknownTrace)?;

        let (new_state, pending_delta) = apply_hold_event(hold.state, HoldEvent::Fill, hold.notional).map_err(|_| {
            state.metrics.state_conflicts_total += 1;
            LedgerStoreError::StateConflict {
                detail: format!("fill received for hold already in state {:?}", hold.state),
            }
        })?;

        let key = (hold.client_id.clone(), hold.symbol.clone());
        let position = state.positions.entry(key).or_default();
        let exposure_before = position.net_exposure;
        let fill_notional = fill_qty as f64 * fill_price;
        let signed_delta = match hold.side {
            Side::Buy => fill_notional,
            Side::Sell => -fill_notional,
        };
        position.pending_exposure = (position.pending_exposure + pending_delta).max(0.0);
        position.net_quantity += match hold.side {
            Side::Buy => fill_qty as f64,
            Side::Sell => -(fill_qty as f64),
        };
        position.net_exposure += signed_delta;
        position.gross_exposure += fill_notional;
        let exposure_after = position.net_exposure;

        let predecessor = state.exposure_chain_tail.get(&hold.client_id).cloned();
        let event = build_exposure_event(
            trace_id,
            &hold.client_id,
            &hold.symbol,
            ExposureEventKind::Filled,
            Some(hold.side),
            Some(fill_qty),
            Some(fill_price),
            pending_delta,
            Some(exposure_before),
            Some(exposure_after),
            predecessor.as_ref(),
        );
        state.exposure_chain_tail.insert(hold.client_id.clone(), event.clone());
        state.exposure_events.entry(hold.client_id.clone()).or_default().push(event.clone());

        if let Some(record) = state.holds.get_mut(trace_id) {
            record.state = new_state;
        }
        state.metrics.fills_total += 1;

        if position.is_flat() {
            if let Ok((closed_state, _)) = apply_hold_event(new_state, HoldEvent::PositionZero, 0.0) {
                self.close_position(&mut state, &hold.client_id, &hold.symbol, trace_id);
                if let Some(record) = state.holds.get_mut(trace_id) {
                    record.state = closed_state;
                }
            }
        }

        Ok(event)
    }

    /// `cancel` (spec §4.3 contract): transitions `AUTHORIZED_HOLD ->
    /// CANCELED`, reversing pending exposure.
    pub fn cancel(&self, trace_id: &str) -> Result<ExposureEvent, LedgerStoreError> {
        let mut state = self.inner.lock().expect("ledger store mutex poisoned");
        let hold = state
            .holds
            .get(trace_id)
            .cloned()
            .ok_or(LedgerStoreError::UnknownTrace)?;

        let (new_state, pending_delta) = apply_hold_event(hold.state, HoldEvent::Cancel, hold.notional).map_err(|_| {
            state.metrics.state_conflicts_total += 1;
            LedgerStoreError::StateConflict {
                detail: format!("cancel received for hold already in state {:?}", hold.state),
            }
        })?;

        let event = self.reverse_pending(&mut state, &hold, trace_id, pending_delta, ExposureEventKind::Cancelled);
        if let Some(record) = state.holds.get_mut(trace_id) {
            record.state = new_state;
        }
        state.metrics.cancels_total += 1;
        Ok(event)
    }

    /// `expire_stale_holds` (spec §4.3 "Expiry sweeper"): scans every
    /// `AUTHORIZED_HOLD` older than `ttl_seconds` and expires it, returning
    /// the newly expired trace ids. Pure of wall-clock itself — `now` is
    /// supplied by the caller's own scheduler (spec §5 "no embedded
    /// scheduler").
    pub fn expire_stale_holds(&self, ttl_seconds: u64, now: u64) -> Vec<String> {
        let mut state = self.inner.lock().expect("ledger store mutex poisoned");
        let stale: Vec<(String, HoldRecord)> = state
            .holds
            .iter()
            .filter(|(_, hold)| hold.state == HoldState::AuthorizedHold && now.saturating_sub(hold.opened_at) >= ttl_seconds)
            .map(|(trace_id, hold)| (trace_id.clone(), hold.clone()))
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for (trace_id, hold) in stale {
            let Ok((new_state, pending_delta)) = apply_hold_event(hold.state, HoldEvent::Expire, hold.notional) else {
                continue;
            };
            self.reverse_pending(&mut state, &hold, &trace_id, pending_delta, ExposureEventKind::Expired);
            if let Some(record) = state.holds.get_mut(&trace_id) {
                record.state = new_state;
            }
            state.metrics.expiries_total += 1;
            expired.push(trace_id);
        }
        expired
    }

    fn reverse_pending(
        &self,
        state: &mut State,
        hold: &HoldRecord,
        trace_id: &str,
        pending_delta: f64,
        kind: ExposureEventKind,
    ) -> ExposureEvent {
        let key = (hold.client_id.clone(), hold.symbol.clone());
        let position = state.positions.entry(key).or_default();
        let exposure_before = position.gross_exposure;
        position.pending_exposure = (position.pending_exposure + pending_delta).max(0.0);
        let exposure_after = position.gross_exposure;

        let predecessor = state.exposure_chain_tail.get(&hold.client_id).cloned();
        let event = build_exposure_event(
            trace_id,
            &hold.client_id,
            &hold.symbol,
            kind,
            Some(hold.side),
            Some(hold.qty),
            hold.price,
            pending_delta,
            Some(exposure_before),
            Some(exposure_after),
            predecessor.as_ref(),
        );
        state.exposure_chain_tail.insert(hold.client_id.clone(), event.clone());
        state.exposure_events.entry(hold.client_id.clone()).or_default().push(event.clone());
        event
    }

    fn close_position(&self, state: &mut State, client_id: &str, symbol: &str, trace_id: &str) {
        let predecessor = state.exposure_chain_tail.get(client_id).cloned();
        let event = build_exposure_event(
            trace_id,
            client_id,
            symbol,
            ExposureEventKind::PositionClosed,
            None,
            None,
            None,
            0.0,
            Some(0.0),
            Some(0.0),
            predecessor.as_ref(),
        );
        state.exposure_chain_tail.insert(client_id.to_string(), event.clone());
        state.exposure_events.entry(client_id.to_string()).or_default().push(event);
    }

    /// The hash-chained exposure events recorded for a client, in append
    /// order (spec Testable Property 1, applied to the exposure chain).
    pub fn exposure_events(&self, client_id: &str) -> Vec<ExposureEvent> {
        let state = self.inner.lock().expect("ledger store mutex poisoned");
        state.exposure_events.get(client_id).cloned().unwrap_or_default()
    }

    pub fn position(&self, client_id: &str, symbol: &str) -> Position {
        let state = self.inner.lock().expect("ledger store mutex poisoned");
        state
            .positions
            .get(&(client_id.to_string(), symbol.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn with_metrics<R>(&self, f: impl FnOnce(&LedgerStoreMetrics) -> R) -> R {
        let state = self.inner.lock().expect("ledger store mutex poisoned");
        f(&state.metrics)
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
