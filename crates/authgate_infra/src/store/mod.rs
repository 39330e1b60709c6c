//! Durable storage: the audit log, the shadow ledger, the idempotency
//! store, and materialized lifecycle read models.

pub mod audit_store;
pub mod idempotency_store;
pub mod ledger_store;
pub mod lifecycle_store;

pub use audit_store::{AuditAppendError, AuditStore, AuditStoreMetrics};
pub use idempotency_store::{IdempotencyReserveOutcome, IdempotencyStore, IdempotencyStoreMetrics};
pub use ledger_store::{LedgerStore, LedgerStoreError, LedgerStoreMetrics, ReserveOutcome};
pub use lifecycle_store::{LifecycleIngestOutcome, LifecycleStore, LifecycleStoreMetrics};
