//! Snapshot economics: a pure, point-in-time projection of exposure impact
//! (spec §4.8).

use crate::token::Decision;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceSource {
    Firm,
    Indicative,
    Reference,
    Unavailable,
}

/// Inputs to `compute` (spec §4.8 contract).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EconomicsInput {
    pub qty: f64,
    pub price: Option<f64>,
    pub reference_price: Option<f64>,
    pub decision: Decision,
    pub exposure_pre: Option<f64>,
    pub currency: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyValidation {
    pub currency: String,
    pub excluded_from_usd_aggregates: bool,
}

/// `compute`'s output (spec §4.8 contract). `currency` is always `"USD"` —
/// the field the snapshot reports in, not necessarily the order's own
/// currency (see `currency_validation`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicsSnapshot {
    pub decision_time_price: Option<f64>,
    pub notional: Option<f64>,
    pub projected_exposure_delta: Option<f64>,
    pub saved_exposure: Option<f64>,
    pub price_source: PriceSource,
    pub price_unavailable: bool,
    pub exposure_pre: Option<f64>,
    pub exposure_post: Option<f64>,
    pub currency: &'static str,
    pub currency_validation: Option<CurrencyValidation>,
}

/// Observability counters for `compute`'s price-source outcomes, the same
/// private-counters/public-accessors/`record_*` shape as
/// `risk::fees::FeeMetrics`.
#[derive(Debug, Default)]
pub struct EconomicsMetrics {
    firm_total: u64,
    indicative_total: u64,
    unavailable_total: u64,
}

impl EconomicsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: PriceSource) {
        match source {
            PriceSource::Firm => self.firm_total += 1,
            PriceSource::Indicative => self.indicative_total += 1,
            PriceSource::Unavailable => self.unavailable_total += 1,
            PriceSource::Reference => self.indicative_total += 1,
        }
    }

    pub fn firm_total(&self) -> u64 {
        self.firm_total
    }

    pub fn indicative_total(&self) -> u64 {
        self.indicative_total
    }

    pub fn unavailable_total(&self) -> u64 {
        self.unavailable_total
    }
}

/// Project the economic impact of a decision (spec §4.8 "Rules").
///
/// Price source is `FIRM` if `price > 0`; else `INDICATIVE` if
/// `reference_price > 0`; else `UNAVAILABLE`. Non-USD order currencies are
/// flagged, never rejected.
pub fn compute(input: &EconomicsInput) -> EconomicsSnapshot {
    let (price_source, decision_time_price) = match (input.price, input.reference_price) {
        (Some(p), _) if p > 0.0 => (PriceSource::Firm, Some(p)),
        (_, Some(r)) if r > 0.0 => (PriceSource::Indicative, Some(r)),
        _ => (PriceSource::Unavailable, None),
    };

    let notional = decision_time_price.map(|p| input.qty * p);

    let (projected_exposure_delta, saved_exposure) = match input.decision {
        Decision::Authorized => (notional, None),
        Decision::Blocked => (None, notional),
    };

    let exposure_post = match (input.exposure_pre, projected_exposure_delta) {
        (Some(pre), Some(delta)) => Some(pre + delta),
        _ => None,
    };

    let currency_validation = if input.currency != "USD" {
        Some(CurrencyValidation {
            currency: input.currency.to_string(),
            excluded_from_usd_aggregates: true,
        })
    } else {
        None
    };

    EconomicsSnapshot {
        decision_time_price,
        notional,
        projected_exposure_delta,
        saved_exposure,
        price_source,
        price_unavailable: matches!(price_source, PriceSource::Unavailable),
        exposure_pre: input.exposure_pre,
        exposure_post,
        currency: "USD",
        currency_validation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> EconomicsInput {
        EconomicsInput {
            qty: 100.0,
            price: Some(185.50),
            reference_price: None,
            decision: Decision::Authorized,
            exposure_pre: Some(0.0),
            currency: "USD",
        }
    }

    #[test]
    fn firm_price_used_when_positive() {
        let snapshot = compute(&base_input());
        assert_eq!(snapshot.price_source, PriceSource::Firm);
        assert_eq!(snapshot.notional, Some(18_550.0));
    }

    #[test]
    fn falls_back_to_reference_price_when_no_firm_price() {
        let mut input = base_input();
        input.price = None;
        input.reference_price = Some(186.0);
        let snapshot = compute(&input);
        assert_eq!(snapshot.price_source, PriceSource::Indicative);
        assert_eq!(snapshot.notional, Some(18_600.0));
    }

    #[test]
    fn unavailable_when_no_price_at_all() {
        let mut input = base_input();
        input.price = None;
        input.reference_price = None;
        let snapshot = compute(&input);
        assert_eq!(snapshot.price_source, PriceSource::Unavailable);
        assert!(snapshot.price_unavailable);
        assert_eq!(snapshot.notional, None);
    }

    #[test]
    fn allow_sets_projected_exposure_delta_and_exposure_post() {
        let snapshot = compute(&base_input());
        assert_eq!(snapshot.projected_exposure_delta, Some(18_550.0));
        assert_eq!(snapshot.exposure_post, Some(18_550.0));
        assert_eq!(snapshot.saved_exposure, None);
    }

    #[test]
    fn block_sets_saved_exposure_not_projected_delta() {
        let mut input = base_input();
        input.decision = Decision::Blocked;
        let snapshot = compute(&input);
        assert_eq!(snapshot.saved_exposure, Some(18_550.0));
        assert_eq!(snapshot.projected_exposure_delta, None);
        assert_eq!(snapshot.exposure_post, None);
    }

    #[test]
    fn non_usd_currency_flagged_but_not_rejected() {
        let mut input = base_input();
        input.currency = "EUR";
        let snapshot = compute(&input);
        assert!(snapshot.currency_validation.is_some());
        assert_eq!(snapshot.currency, "USD");
    }

    #[test]
    fn zero_price_is_not_firm() {
        let mut input = base_input();
        input.price = Some(0.0);
        input.reference_price = Some(190.0);
        let snapshot = compute(&input);
        assert_eq!(snapshot.price_source, PriceSource::Indicative);
    }

    #[test]
    fn metrics_tally_by_price_source() {
        let mut metrics = EconomicsMetrics::new();
        metrics.record(PriceSource::Firm);
        metrics.record(PriceSource::Indicative);
        metrics.record(PriceSource::Unavailable);
        metrics.record(PriceSource::Firm);
        assert_eq!(metrics.firm_total(), 2);
        assert_eq!(metrics.indicative_total(), 1);
        assert_eq!(metrics.unavailable_total(), 1);
    }
}
