//! Closed-set configuration with fail-closed defaults (spec §6
//! "Configuration (closed set)").
//!
//! A parameter missing at runtime falls back to its default when one exists;
//! when it doesn't (signing material, the policy bundle path, store
//! connection settings), the gate must refuse to start rather than guess.

use std::fmt;

/// Every numeric, defaultable configuration parameter this system reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigParam {
    TokenTtlSeconds,
    HoldExpirySweepSeconds,
    IdempotencyRetentionDays,
    CircuitFailureThreshold,
    CircuitFailureWindowSeconds,
    CircuitResetSeconds,
    CircuitResetSuccesses,
}

pub const ALL_PARAMS: &[ConfigParam] = &[
    ConfigParam::TokenTtlSeconds,
    ConfigParam::HoldExpirySweepSeconds,
    ConfigParam::IdempotencyRetentionDays,
    ConfigParam::CircuitFailureThreshold,
    ConfigParam::CircuitFailureWindowSeconds,
    ConfigParam::CircuitResetSeconds,
    ConfigParam::CircuitResetSuccesses,
];

pub fn param_name(param: ConfigParam) -> &'static str {
    match param {
        ConfigParam::TokenTtlSeconds => "TOKEN_TTL_SECONDS",
        ConfigParam::HoldExpirySweepSeconds => "HOLD_EXPIRY_SWEEP_SECONDS",
        ConfigParam::IdempotencyRetentionDays => "IDEMPOTENCY_RETENTION_DAYS",
        ConfigParam::CircuitFailureThreshold => "CIRCUIT_THRESHOLD_FAILURES",
        ConfigParam::CircuitFailureWindowSeconds => "CIRCUIT_THRESHOLD_WINDOW_SECONDS",
        ConfigParam::CircuitResetSeconds => "CIRCUIT_RESET_SECONDS",
        ConfigParam::CircuitResetSuccesses => "CIRCUIT_RESET_SUCCESSES",
    }
}

/// Appendix-style default for a parameter (spec §6 defaults).
pub fn default_value(param: ConfigParam) -> Option<f64> {
    match param {
        ConfigParam::TokenTtlSeconds => Some(300.0),
        ConfigParam::HoldExpirySweepSeconds => Some(60.0),
        ConfigParam::IdempotencyRetentionDays => Some(7.0),
        ConfigParam::CircuitFailureThreshold => Some(5.0),
        ConfigParam::CircuitFailureWindowSeconds => Some(30.0),
        ConfigParam::CircuitResetSeconds => Some(60.0),
        ConfigParam::CircuitResetSuccesses => Some(3.0),
    }
}

/// Error when a required parameter is missing and has no default.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingConfigError {
    pub param_name: &'static str,
    pub reason: &'static str,
}

impl fmt::Display for MissingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config fail-closed: '{}' is missing or invalid ({})",
            self.param_name, self.reason
        )
    }
}

impl std::error::Error for MissingConfigError {}

/// Resolve a numeric parameter with fail-closed semantics: explicit value
/// wins, else the default, else an error.
pub fn resolve_config_value(param: ConfigParam, value: Option<f64>) -> Result<f64, MissingConfigError> {
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 {
            return Err(MissingConfigError {
                param_name: param_name(param),
                reason: "value must be a non-negative finite number",
            });
        }
        return Ok(v);
    }
    default_value(param).ok_or_else(|| MissingConfigError {
        param_name: param_name(param),
        reason: "no default; gate must fail-closed",
    })
}

/// String-valued parameters with no safe default: supplying a value is
/// mandatory, there is nothing to fall back to.
pub fn require_string(name: &'static str, value: Option<&str>) -> Result<String, MissingConfigError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Ok(v.to_string()),
        None => Err(MissingConfigError {
            param_name: name,
            reason: "no default exists for this parameter; gate must fail-closed",
        }),
    }
}

/// Store connection settings (spec §6 "store connection settings"). No
/// defaults — every field must be supplied explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConnectionConfig {
    pub audit_log_path: String,
    pub ledger_snapshot_path: String,
    pub lifecycle_snapshot_path: String,
}

/// Fully resolved gate configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub signing_key_material: String,
    pub policy_bundle_path: String,
    pub token_ttl_seconds: f64,
    pub hold_expiry_sweep_seconds: f64,
    pub idempotency_retention_days: f64,
    pub circuit_failure_threshold: f64,
    pub circuit_failure_window_seconds: f64,
    pub circuit_reset_seconds: f64,
    pub circuit_reset_successes: f64,
    pub store: StoreConnectionConfig,
}

/// Inputs as read from the environment/config file, before fail-closed
/// resolution. `None` means "not supplied".
#[derive(Debug, Clone, Default)]
pub struct GateConfigInput {
    pub signing_key_material: Option<String>,
    pub policy_bundle_path: Option<String>,
    pub token_ttl_seconds: Option<f64>,
    pub hold_expiry_sweep_seconds: Option<f64>,
    pub idempotency_retention_days: Option<f64>,
    pub circuit_failure_threshold: Option<f64>,
    pub circuit_failure_window_seconds: Option<f64>,
    pub circuit_reset_seconds: Option<f64>,
    pub circuit_reset_successes: Option<f64>,
    pub audit_log_path: Option<String>,
    pub ledger_snapshot_path: Option<String>,
    pub lifecycle_snapshot_path: Option<String>,
}

pub fn resolve_gate_config(input: GateConfigInput) -> Result<GateConfig, MissingConfigError> {
    Ok(GateConfig {
        signing_key_material: require_string("SIGNING_KEY_MATERIAL", input.signing_key_material.as_deref())?,
        policy_bundle_path: require_string("POLICY_BUNDLE_PATH", input.policy_bundle_path.as_deref())?,
        token_ttl_seconds: resolve_config_value(ConfigParam::TokenTtlSeconds, input.token_ttl_seconds)?,
        hold_expiry_sweep_seconds: resolve_config_value(
            ConfigParam::HoldExpirySweepSeconds,
            input.hold_expiry_sweep_seconds,
        )?,
        idempotency_retention_days: resolve_config_value(
            ConfigParam::IdempotencyRetentionDays,
            input.idempotency_retention_days,
        )?,
        circuit_failure_threshold: resolve_config_value(
            ConfigParam::CircuitFailureThreshold,
            input.circuit_failure_threshold,
        )?,
        circuit_failure_window_seconds: resolve_config_value(
            ConfigParam::CircuitFailureWindowSeconds,
            input.circuit_failure_window_seconds,
        )?,
        circuit_reset_seconds: resolve_config_value(ConfigParam::CircuitResetSeconds, input.circuit_reset_seconds)?,
        circuit_reset_successes: resolve_config_value(
            ConfigParam::CircuitResetSuccesses,
            input.circuit_reset_successes,
        )?,
        store: StoreConnectionConfig {
            audit_log_path: require_string("AUDIT_LOG_PATH", input.audit_log_path.as_deref())?,
            ledger_snapshot_path: require_string("LEDGER_SNAPSHOT_PATH", input.ledger_snapshot_path.as_deref())?,
            lifecycle_snapshot_path: require_string(
                "LIFECYCLE_SNAPSHOT_PATH",
                input.lifecycle_snapshot_path.as_deref(),
            )?,
        },
    })
}
