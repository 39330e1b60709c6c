//! Materialized lifecycle read models (spec §4.6): per-chain event history,
//! current normalized status, and exactly-once ingestion keyed by
//! `(source_system, event_type, event_id)`.
//!
//! Mirrors `store/ledger_store.rs`'s replay-reduction pattern: each ingested
//! envelope folds into a running per-`chain_id` status the same way WAL
//! replay folds intents into a running ledger state, and dedup delegates to
//! the same `IdempotencyStore` the lifecycle ingress uses for any other
//! at-most-once event.

use crate::store::idempotency_store::{IdempotencyReserveOutcome, IdempotencyStore, IdempotencyStoreMetrics};
use authgate_core::idempotency::{IdempotencyKey, ProcessingResult, ReserveDecision};
use authgate_core::lifecycle::{check_transition, LifecycleEnvelope, NormalizedStatus};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct LifecycleStoreMetrics {
    ingested_total: u64,
    violations_total: u64,
}

impl LifecycleStoreMetrics {
    pub fn ingested_total(&self) -> u64 {
        self.ingested_total
    }

    pub fn violations_total(&self) -> u64 {
        self.violations_total
    }
}

struct ChainState {
    envelopes: Vec<LifecycleEnvelope>,
    current_status: Option<NormalizedStatus>,
}

struct Inner {
    chains: HashMap<String, ChainState>,
    metrics: LifecycleStoreMetrics,
}

/// Outcome of `ingest` (spec §4.6 "never silently dropped"): the envelope is
/// always accepted on first sight, with violations flagged rather than
/// rejected; a duplicate or mismatched replay of the same idempotency key
/// returns the store's recorded verdict instead of re-ingesting.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleIngestOutcome {
    Ingested {
        envelope: LifecycleEnvelope,
        has_violations: bool,
        warnings: Vec<String>,
    },
    Duplicate {
        idempotency: IdempotencyReserveOutcome,
    },
}

/// Lifecycle event store: per-chain ordered history plus materialized
/// current status (spec §4.6, §3 "Lifecycle event envelope").
pub struct LifecycleStore {
    inner: Mutex<Inner>,
    idempotency: IdempotencyStore,
}

impl LifecycleStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                chains: HashMap::new(),
                metrics: LifecycleStoreMetrics::default(),
            }),
            idempotency: IdempotencyStore::new(),
        }
    }

    /// Ingest one envelope under its idempotency key. `envelope.integrity`
    /// is completed here (`chain_id`, `prev_event_hash`) from the running
    /// per-chain tail; `envelope.integrity.payload_hash` must already be set
    /// by the caller (computed via `lifecycle::compute_payload_hash`).
    pub fn ingest(&self, key: IdempotencyKey, mut envelope: LifecycleEnvelope, now: u64) -> LifecycleIngestOutcome {
        let idempotency_payload = envelope.payload.clone();
        let reserve = self.idempotency.check_and_reserve(&key, &idempotency_payload, now);
        if !reserve.reserved {
            return LifecycleIngestOutcome::Duplicate { idempotency: reserve };
        }

        let mut inner = self.inner.lock().expect("lifecycle store mutex poisoned");
        let chain_id = envelope.correlation.trace_id.clone();
        let chain = inner.chains.entry(chain_id.clone()).or_insert_with(|| ChainState {
            envelopes: Vec::new(),
            current_status: None,
        });

        let check = check_transition(chain.current_status, envelope.normalization.status);
        let prev_hash = chain.envelopes.last().map(|e| e.integrity.payload_hash.clone());
        envelope.integrity.chain_id = chain_id;
        envelope.integrity.prev_event_hash = prev_hash;

        chain.current_status = Some(envelope.normalization.status);
        chain.envelopes.push(envelope.clone());
        inner.metrics.ingested_total += 1;
        if !check.allowed {
            inner.metrics.violations_total += 1;
        }
        drop(inner);

        self.idempotency.complete(&key, now, ProcessingResult::Success, None);

        LifecycleIngestOutcome::Ingested {
            envelope,
            has_violations: !check.allowed,
            warnings: check.warning.into_iter().collect(),
        }
    }

    /// The ordered event history for a trace (spec §4.7 "LP timeline" and
    /// general read-model access).
    pub fn events(&self, chain_id: &str) -> Vec<LifecycleEnvelope> {
        let inner = self.inner.lock().expect("lifecycle store mutex poisoned");
        inner.chains.get(chain_id).map(|c| c.envelopes.clone()).unwrap_or_default()
    }

    pub fn current_status(&self, chain_id: &str) -> Option<NormalizedStatus> {
        let inner = self.inner.lock().expect("lifecycle store mutex poisoned");
        inner.chains.get(chain_id).and_then(|c| c.current_status)
    }

    pub fn with_metrics<R>(&self, f: impl FnOnce(&LifecycleStoreMetrics) -> R) -> R {
        let inner = self.inner.lock().expect("lifecycle store mutex poisoned");
        f(&inner.metrics)
    }

    pub fn with_idempotency_metrics<R>(&self, f: impl FnOnce(&IdempotencyStoreMetrics) -> R) -> R {
        self.idempotency.with_metrics(f)
    }
}

impl Default for LifecycleStore {
    fn default() -> Self {
        Self::new()
    }
}
