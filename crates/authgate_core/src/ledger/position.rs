//! Per-`(client_id, symbol)` exposure state and breach checking (spec §4.3).

use crate::error::BreachType;
use std::collections::HashMap;

/// Per-client limits (spec §3 "Client limits"). All USD.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientLimits {
    pub max_gross: f64,
    pub max_net: f64,
    pub max_single_order: f64,
    pub per_symbol: HashMap<String, f64>,
}

/// Shadow-ledger position for a single `(client_id, symbol)` pair.
///
/// Invariants: `gross_exposure >= |net_exposure|`; `pending_exposure >= 0`;
/// `pending_exposure` reflects only unsettled authorized holds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub net_quantity: f64,
    pub avg_cost_basis: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub pending_exposure: f64,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.net_exposure.abs() < 1e-9 && self.pending_exposure.abs() < 1e-9
    }
}

/// Outcome of a breach check (spec §4.3 `check`/`reserve` contract).
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub allowed: bool,
    pub breach: Option<BreachType>,
    pub breach_detail: Option<String>,
    pub current_gross: f64,
    pub current_net: f64,
    pub pending: f64,
    pub projected_total: f64,
}

/// Evaluate the fixed breach order `SINGLE_ORDER > GROSS_EXPOSURE >
/// NET_EXPOSURE > SYMBOL_LIMIT` and return the first breach found, if any.
/// `net` comparisons use `|net|` — net exposure is signed.
pub fn check_breach(
    position: &Position,
    limits: &ClientLimits,
    symbol: &str,
    projected_notional: f64,
) -> CheckResult {
    let current_gross = position.gross_exposure;
    let current_net = position.net_exposure;
    let pending = position.pending_exposure;
    let projected_total = current_gross + pending + projected_notional;
    let projected_net = current_net + projected_notional;

    let mut result = CheckResult {
        allowed: true,
        breach: None,
        breach_detail: None,
        current_gross,
        current_net,
        pending,
        projected_total,
    };

    if projected_notional > limits.max_single_order {
        result.allowed = false;
        result.breach = Some(BreachType::SingleOrder);
        result.breach_detail = Some(format!(
            "order notional {projected_notional} exceeds max_single_order {}",
            limits.max_single_order
        ));
        return result;
    }

    if projected_total > limits.max_gross {
        result.allowed = false;
        result.breach = Some(BreachType::GrossExposure);
        result.breach_detail = Some(format!(
            "projected gross {projected_total} exceeds max_gross {}",
            limits.max_gross
        ));
        return result;
    }

    if projected_net.abs() > limits.max_net {
        result.allowed = false;
        result.breach = Some(BreachType::NetExposure);
        result.breach_detail = Some(format!(
            "projected |net| {} exceeds max_net {}",
            projected_net.abs(),
            limits.max_net
        ));
        return result;
    }

    if let Some(&symbol_limit) = limits.per_symbol.get(symbol) {
        if projected_total > symbol_limit {
            result.allowed = false;
            result.breach = Some(BreachType::SymbolLimit);
            result.breach_detail = Some(format!(
                "projected exposure {projected_total} exceeds symbol limit {symbol_limit} for {symbol}"
            ));
            return result;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ClientLimits {
        ClientLimits {
            max_gross: 1_000_000.0,
            max_net: 500_000.0,
            max_single_order: 100_000.0,
            per_symbol: HashMap::new(),
        }
    }

    #[test]
    fn allows_within_all_limits() {
        let position = Position::default();
        let result = check_breach(&position, &limits(), "AAPL", 18_550.0);
        assert!(result.allowed);
        assert_eq!(result.breach, None);
    }

    #[test]
    fn single_order_breach_takes_priority_over_gross() {
        let mut lim = limits();
        lim.max_gross = 10.0;
        lim.max_single_order = 5.0;
        let position = Position::default();
        let result = check_breach(&position, &lim, "AAPL", 18_550.0);
        assert_eq!(result.breach, Some(BreachType::SingleOrder));
    }

    #[test]
    fn gross_breach_reported_when_single_order_ok() {
        let mut lim = limits();
        lim.max_gross = 10_000.0;
        let position = Position::default();
        let result = check_breach(&position, &lim, "AAPL", 18_550.0);
        assert_eq!(result.breach, Some(BreachType::GrossExposure));
    }

    #[test]
    fn net_breach_uses_absolute_value() {
        let mut lim = limits();
        lim.max_gross = 10_000_000.0;
        lim.max_net = 100.0;
        let mut position = Position::default();
        position.net_exposure = -50.0;
        let result = check_breach(&position, &lim, "AAPL", 60.0);
        assert_eq!(result.breach, Some(BreachType::NetExposure));
    }

    #[test]
    fn symbol_limit_checked_last() {
        let mut lim = limits();
        lim.max_gross = 10_000_000.0;
        lim.max_net = 10_000_000.0;
        lim.per_symbol.insert("AAPL".to_string(), 100.0);
        let position = Position::default();
        let result = check_breach(&position, &lim, "AAPL", 150.0);
        assert_eq!(result.breach, Some(BreachType::SymbolLimit));
    }
}
