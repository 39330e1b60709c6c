//! Idempotency key store: `(source_system, event_type, event_id) ->
//! IdempotencyRecord` (spec §3 "Idempotency record", §4.5).
//!
//! An insert-if-absent registry over the three-part key, reaped by a
//! `cleanup` sweep on retention age rather than a capacity ceiling —
//! lifecycle events accrue continuously rather than bounded to a fixed
//! working set.

use authgate_core::idempotency::{compute_payload_hash, decide, IdempotencyKey, IdempotencyRecord, ProcessingResult, ReserveDecision};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct IdempotencyStoreMetrics {
    reserved_total: u64,
    replayed_total: u64,
    payload_mismatches_total: u64,
    expired_total: u64,
}

impl IdempotencyStoreMetrics {
    pub fn reserved_total(&self) -> u64 {
        self.reserved_total
    }
    pub fn replayed_total(&self) -> u64 {
        self.replayed_total
    }
    pub fn payload_mismatches_total(&self) -> u64 {
        self.payload_mismatches_total
    }
    pub fn expired_total(&self) -> u64 {
        self.expired_total
    }
}

struct Inner {
    records: HashMap<IdempotencyKey, IdempotencyRecord>,
    metrics: IdempotencyStoreMetrics,
}

/// Store-level outcome of `check_and_reserve` (spec §4.5 contract): the pure
/// `ReserveDecision` plus whether this call actually reserved the key.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyReserveOutcome {
    pub decision: ReserveDecision,
    pub reserved: bool,
}

pub struct IdempotencyStore {
    inner: Mutex<Inner>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                metrics: IdempotencyStoreMetrics::default(),
            }),
        }
    }

    /// `check_and_reserve` (spec §4.5 contract): atomically decide whether
    /// the caller should process `payload` under `key`, reserving a fresh
    /// record at `now` if so.
    pub fn check_and_reserve(&self, key: &IdempotencyKey, payload: &Value, now: u64) -> IdempotencyReserveOutcome {
        let mut inner = self.inner.lock().expect("idempotency store mutex poisoned");
        let payload_hash = compute_payload_hash(payload);
        let existing = inner.records.get(key).cloned();
        let decision = decide(existing.as_ref(), &payload_hash);

        match &decision {
            ReserveDecision::ShouldProcess => {
                inner.records.insert(
                    key.clone(),
                    IdempotencyRecord {
                        payload_hash,
                        first_seen_at: now,
                        last_attempt_at: now,
                        completed_at: None,
                        result: ProcessingResult::Pending,
                        result_data: None,
                        attempt_count: 1,
                    },
                );
                inner.metrics.reserved_total += 1;
                IdempotencyReserveOutcome { decision, reserved: true }
            }
            ReserveDecision::AlreadyProcessed { .. } => {
                if let Some(record) = inner.records.get_mut(key) {
                    record.last_attempt_at = now;
                    record.attempt_count += 1;
                }
                inner.metrics.replayed_total += 1;
                IdempotencyReserveOutcome { decision, reserved: false }
            }
            ReserveDecision::PayloadMismatch { .. } => {
                if let Some(record) = inner.records.get_mut(key) {
                    record.last_attempt_at = now;
                    record.attempt_count += 1;
                }
                inner.metrics.payload_mismatches_total += 1;
                IdempotencyReserveOutcome { decision, reserved: false }
            }
        }
    }

    /// Mark a reserved key's processing as finished (spec §4.5
    /// `complete`): records the terminal result so future replays return it
    /// instead of `Pending`.
    pub fn complete(&self, key: &IdempotencyKey, now: u64, result: ProcessingResult, result_data: Option<Value>) {
        let mut inner = self.inner.lock().expect("idempotency store mutex poisoned");
        if let Some(record) = inner.records.get_mut(key) {
            record.completed_at = Some(now);
            record.result = result;
            record.result_data = result_data;
        }
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        let inner = self.inner.lock().expect("idempotency store mutex poisoned");
        inner.records.get(key).cloned()
    }

    /// `cleanup` (spec §4.5, §6 `IDEMPOTENCY_RETENTION_DAYS`): evict records
    /// older than `retention_days` as of `now`, returning the count removed.
    pub fn cleanup(&self, now: u64, retention_days: f64) -> usize {
        let mut inner = self.inner.lock().expect("idempotency store mutex poisoned");
        let before = inner.records.len();
        inner
            .records
            .retain(|_, record| !authgate_core::idempotency::is_expired(record.first_seen_at, now, retention_days));
        let removed = before - inner.records.len();
        inner.metrics.expired_total += removed as u64;
        removed
    }

    pub fn with_metrics<R>(&self, f: impl FnOnce(&IdempotencyStoreMetrics) -> R) -> R {
        let inner = self.inner.lock().expect("idempotency store mutex poisoned");
        f(&inner.metrics)
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}
