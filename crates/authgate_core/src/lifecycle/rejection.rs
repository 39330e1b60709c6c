//! Rejection-reason normalization (spec §3 "Rejection reason", §4.6).

use super::SourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TAXONOMY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReasonClass {
    Margin,
    Symbol,
    RiskPolicy,
    Price,
    LpInternal,
    Connectivity,
    RateLimit,
    Validation,
    Duplicate,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRejection {
    pub provider_code: Option<String>,
    pub provider_message: Option<String>,
    pub provider_fields: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionReason {
    pub taxonomy_version: u32,
    pub reason_class: ReasonClass,
    pub reason_code: String,
    pub confidence: Confidence,
    pub raw: RawRejection,
}

/// One `(source_kind, raw_code)` mapping table entry. New codes are added
/// additively; existing ones are never renamed in place (taxonomy_version
/// bumps instead).
struct MappingEntry {
    source: SourceKind,
    raw_code: &'static str,
    class: ReasonClass,
    reason_code: &'static str,
}

const MAPPINGS: &[MappingEntry] = &[
    MappingEntry { source: SourceKind::Lp, raw_code: "INSUFFICIENT_MARGIN", class: ReasonClass::Margin, reason_code: "LP_MARGIN_INSUFFICIENT" },
    MappingEntry { source: SourceKind::Lp, raw_code: "UNKNOWN_SYMBOL", class: ReasonClass::Symbol, reason_code: "LP_SYMBOL_UNKNOWN" },
    MappingEntry { source: SourceKind::Lp, raw_code: "PRICE_OUT_OF_RANGE", class: ReasonClass::Price, reason_code: "LP_PRICE_OUT_OF_RANGE" },
    MappingEntry { source: SourceKind::Lp, raw_code: "RATE_LIMITED", class: ReasonClass::RateLimit, reason_code: "LP_RATE_LIMITED" },
    MappingEntry { source: SourceKind::Mt5, raw_code: "10019", class: ReasonClass::Margin, reason_code: "MT5_NOT_ENOUGH_MONEY" },
    MappingEntry { source: SourceKind::Mt5, raw_code: "10018", class: ReasonClass::Symbol, reason_code: "MT5_MARKET_CLOSED" },
    MappingEntry { source: SourceKind::Bridge, raw_code: "CONN_RESET", class: ReasonClass::Connectivity, reason_code: "BRIDGE_CONNECTION_RESET" },
    MappingEntry { source: SourceKind::Sim, raw_code: "SIM_VALIDATION_FAILED", class: ReasonClass::Validation, reason_code: "SIM_VALIDATION_FAILED" },
];

/// Fallback regexes matched against `provider_message` when `(source, raw_code)`
/// has no table entry.
const MESSAGE_FALLBACKS: &[(&str, ReasonClass, &str)] = &[
    ("margin", ReasonClass::Margin, "MARGIN_INSUFFICIENT_FALLBACK"),
    ("duplicate", ReasonClass::Duplicate, "DUPLICATE_ORDER_FALLBACK"),
    ("rate limit", ReasonClass::RateLimit, "RATE_LIMITED_FALLBACK"),
    ("connect", ReasonClass::Connectivity, "CONNECTIVITY_FALLBACK"),
];

/// Classify a raw rejection. Table lookup first, then a message-regex
/// fallback, then `UNKNOWN/UNKNOWN_REJECT` at `LOW` confidence — raw fields
/// are always preserved regardless of which branch matched.
pub fn normalize(
    source: SourceKind,
    provider_code: Option<&str>,
    provider_message: Option<&str>,
    provider_fields: Value,
) -> RejectionReason {
    let raw = RawRejection {
        provider_code: provider_code.map(str::to_string),
        provider_message: provider_message.map(str::to_string),
        provider_fields,
    };

    if let Some(code) = provider_code {
        if let Some(entry) = MAPPINGS.iter().find(|e| e.source == source && e.raw_code == code) {
            return RejectionReason {
                taxonomy_version: TAXONOMY_VERSION,
                reason_class: entry.class,
                reason_code: entry.reason_code.to_string(),
                confidence: Confidence::High,
                raw,
            };
        }
    }

    if let Some(message) = provider_message {
        let lower = message.to_lowercase();
        if let Some((_, class, code)) = MESSAGE_FALLBACKS.iter().find(|(needle, _, _)| lower.contains(needle)) {
            return RejectionReason {
                taxonomy_version: TAXONOMY_VERSION,
                reason_class: *class,
                reason_code: code.to_string(),
                confidence: Confidence::Low,
                raw,
            };
        }
    }

    RejectionReason {
        taxonomy_version: TAXONOMY_VERSION,
        reason_class: ReasonClass::Unknown,
        reason_code: "UNKNOWN_REJECT".to_string(),
        confidence: Confidence::Low,
        raw,
    }
}
