//! Idempotency primitives: keying, payload hashing, and the pure decision
//! logic behind at-most-once lifecycle-event processing (spec §3
//! "Idempotency record", §4.5).
//!
//! The actual keyed map and its insert-if-absent atomicity live in
//! `authgate_infra::store::idempotency_store` (this crate does no I/O and
//! holds no state); everything here is a pure function of its inputs so the
//! dedup decision itself is unit-testable without a store.

pub mod hash;

pub use hash::{compute_payload_hash, is_expired};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `(source_system, event_type, event_id)` (spec §3 "Idempotency record").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub source_system: String,
    pub event_type: String,
    pub event_id: String,
}

impl IdempotencyKey {
    pub fn new(
        source_system: impl Into<String>,
        event_type: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            source_system: source_system.into(),
            event_type: event_type.into(),
            event_id: event_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingResult {
    Pending,
    Success,
    Failed,
}

/// The persisted record behind a key (spec §3). Timestamps are epoch
/// seconds — retention arithmetic (`is_expired`) and the hot-path dedup
/// decision (`decide`) both stay pure integer comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub payload_hash: String,
    pub first_seen_at: u64,
    pub last_attempt_at: u64,
    pub completed_at: Option<u64>,
    pub result: ProcessingResult,
    pub result_data: Option<Value>,
    pub attempt_count: u32,
}

/// Outcome of `decide` (spec §4.5 `check_and_reserve` contract, minus the
/// atomic reservation itself — that's the store's job).
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveDecision {
    /// No record exists yet: the caller reserves the key and processes.
    ShouldProcess,
    /// A record exists with a matching payload hash: replay the prior result.
    AlreadyProcessed {
        first_seen_at: u64,
        result: ProcessingResult,
        result_data: Option<Value>,
    },
    /// A record exists but the incoming payload differs: surfaced as a
    /// warning, never enforced — the original record is left untouched
    /// (spec §4.5, §9 "payload-mismatch on idempotent keys is surfaced, not
    /// enforced").
    PayloadMismatch {
        first_seen_at: u64,
        result: ProcessingResult,
        result_data: Option<Value>,
    },
}

/// Pure decision given an existing record (if any) and the incoming
/// payload's hash. The caller (the store) is responsible for actually
/// inserting a fresh record on `ShouldProcess` and bumping `attempt_count`
/// on every other branch.
pub fn decide(existing: Option<&IdempotencyRecord>, incoming_payload_hash: &str) -> ReserveDecision {
    match existing {
        None => ReserveDecision::ShouldProcess,
        Some(record) if record.payload_hash == incoming_payload_hash => ReserveDecision::AlreadyProcessed {
            first_seen_at: record.first_seen_at,
            result: record.result,
            result_data: record.result_data.clone(),
        },
        Some(record) => ReserveDecision::PayloadMismatch {
            first_seen_at: record.first_seen_at,
            result: record.result,
            result_data: record.result_data.clone(),
        },
    }
}
