//! Append-only, per-trace hash-chained audit log.
//!
//! An in-memory index keyed by trace id, with an optional JSONL-backed
//! append log so restarts replay the same chain they left off. The
//! canonicalization and hashing themselves live in `authgate_core::audit` —
//! this module only owns durability and the per-trace `Vec<AuditEvent>` index.

use authgate_core::audit::{build_event, verify_chain, AuditEvent, ChainVerification};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Error appending an audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditAppendError {
    WriteFailed { reason: String },
}

impl std::fmt::Display for AuditAppendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WriteFailed { reason } => write!(f, "audit append failed: {reason}"),
        }
    }
}

impl std::error::Error for AuditAppendError {}

/// Observability counters for the audit log's append path.
#[derive(Debug, Default)]
pub struct AuditStoreMetrics {
    appends_total: u64,
    write_errors_total: u64,
    verify_failures_total: u64,
}

impl AuditStoreMetrics {
    pub fn appends_total(&self) -> u64 {
        self.appends_total
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total
    }

    pub fn verify_failures_total(&self) -> u64 {
        self.verify_failures_total
    }

    fn record_append(&mut self) {
        self.appends_total += 1;
    }

    fn record_write_error(&mut self) {
        self.write_errors_total += 1;
    }

    fn record_verify_failure(&mut self) {
        self.verify_failures_total += 1;
    }
}

struct Inner {
    by_trace: HashMap<String, Vec<AuditEvent>>,
    storage_path: Option<PathBuf>,
    metrics: AuditStoreMetrics,
}

/// Audit event store: append/read/verify per trace (spec §4.4 contract).
pub struct AuditStore {
    inner: Mutex<Inner>,
}

impl AuditStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_trace: HashMap::new(),
                storage_path: None,
                metrics: AuditStoreMetrics::default(),
            }),
        }
    }

    /// Create/load a store backed by a JSONL file, replaying prior events
    /// into the per-trace index on open.
    pub fn with_storage_path(storage_path: impl AsRef<Path>) -> io::Result<Self> {
        let path = storage_path.as_ref().to_path_buf();
        let events = read_events_from_path(&path)?;
        let mut by_trace: HashMap<String, Vec<AuditEvent>> = HashMap::new();
        for event in events {
            by_trace.entry(event.trace_id.clone()).or_default().push(event);
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                by_trace,
                storage_path: Some(path),
                metrics: AuditStoreMetrics::default(),
            }),
        })
    }

    /// Append the next event in `trace_id`'s chain (spec §4.4 `append`).
    pub fn append(
        &self,
        trace_id: &str,
        event_type: &str,
        event_version: u32,
        payload: Value,
        created_at: impl Into<String>,
    ) -> Result<AuditEvent, AuditAppendError> {
        let mut inner = self.inner.lock().expect("audit store mutex poisoned");
        let predecessor = inner.by_trace.get(trace_id).and_then(|chain| chain.last()).cloned();
        let event = build_event(
            trace_id,
            event_type,
            event_version,
            payload,
            created_at,
            predecessor.as_ref(),
        );

        if let Some(path) = inner.storage_path.clone() {
            if let Err(reason) = append_event_to_path(&path, &event) {
                inner.metrics.record_write_error();
                return Err(AuditAppendError::WriteFailed { reason });
            }
        }

        inner.by_trace.entry(trace_id.to_string()).or_default().push(event.clone());
        inner.metrics.record_append();
        Ok(event)
    }

    /// Read the ordered event chain for a trace (spec §4.4 `read`).
    pub fn read(&self, trace_id: &str) -> Vec<AuditEvent> {
        let inner = self.inner.lock().expect("audit store mutex poisoned");
        inner.by_trace.get(trace_id).cloned().unwrap_or_default()
    }

    /// Verify the stored chain for a trace, failing closed the way the
    /// reconstruction layer requires (spec §4.4, §4.7).
    pub fn verify(&self, trace_id: &str) -> ChainVerification {
        let events = self.read(trace_id);
        let verification = verify_chain(&events);
        if !verification.valid {
            let mut inner = self.inner.lock().expect("audit store mutex poisoned");
            inner.metrics.record_verify_failure();
        }
        verification
    }

    pub fn with_metrics<R>(&self, f: impl FnOnce(&AuditStoreMetrics) -> R) -> R {
        let inner = self.inner.lock().expect("audit store mutex poisoned");
        f(&inner.metrics)
    }
}

impl Default for AuditStore {
    fn default() -> Self {
        Self::new()
    }
}

fn append_event_to_path(path: &Path, event: &AuditEvent) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create audit log parent directory {}: {e}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("failed to open audit log {}: {e}", path.display()))?;
    let line = serde_json::to_string(event).map_err(|e| format!("failed to encode audit event: {e}"))?;
    file.write_all(line.as_bytes())
        .map_err(|e| format!("failed to write audit event to {}: {e}", path.display()))?;
    file.write_all(b"\n")
        .map_err(|e| format!("failed to write audit log newline {}: {e}", path.display()))?;
    file.flush()
        .map_err(|e| format!("failed to flush audit log {}: {e}", path.display()))
}

fn read_events_from_path(path: &Path) -> io::Result<Vec<AuditEvent>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(trimmed).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid audit event at line {} in {}: {e}", index + 1, path.display()),
            )
        })?;
        events.push(event);
    }
    Ok(events)
}
