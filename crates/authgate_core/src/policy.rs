//! Policy Evaluator (spec §4.2): ordered rules, first match wins.

use crate::audit::{canonical_json, sha256_hex_concat};
use crate::order::{Order, Side};
use serde_json::Value;

/// Exposure context the evaluator consults alongside the order. Mirrors the
/// fields a rule predicate can reasonably reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureContext {
    pub current_gross: f64,
    pub current_net: f64,
    pub pending: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Block,
}

/// A single ordered rule. `predicate` is a plain function pointer so the
/// whole bundle stays `Send + Sync` and trivially cloneable for hot-reload.
#[derive(Clone)]
pub struct PolicyRule {
    pub rule_id: String,
    pub predicate: fn(&Order, &ExposureContext) -> bool,
    pub action: RuleAction,
}

impl std::fmt::Debug for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRule")
            .field("rule_id", &self.rule_id)
            .field("action", &self.action)
            .finish()
    }
}

/// The active, hot-reloadable set of rules (spec §4.2 "Hot reload").
#[derive(Debug, Clone)]
pub struct PolicyBundle {
    pub version: String,
    pub rules: Vec<PolicyRule>,
}

impl PolicyBundle {
    /// Canonical content hashed for `policy_snapshot_hash`: the rule ids and
    /// actions in order, plus the version. Predicates are not representable
    /// as data, so the content hash binds identity (id + action + order),
    /// which is exactly what a verifier needs to detect a silently swapped
    /// rule.
    pub fn canonical_content(&self) -> Value {
        let rules: Vec<Value> = self
            .rules
            .iter()
            .map(|r| {
                serde_json::json!({
                    "rule_id": r.rule_id,
                    "action": match r.action {
                        RuleAction::Allow => "ALLOW",
                        RuleAction::Block => "BLOCK",
                    },
                })
            })
            .collect();
        serde_json::json!({ "version": self.version, "rules": rules })
    }

    /// Full 64-hex SHA-256 of the canonical bundle content.
    pub fn content_hash(&self) -> String {
        let json = canonical_json(&self.canonical_content());
        sha256_hex_concat(&[json.as_bytes()])
    }

    /// The on-token form: first 16 hex chars of `content_hash`. The
    /// evidence-pack consistency check compares this same 16-char prefix
    /// against a separately-hashed `policyContent`, never the full 64 chars.
    pub fn snapshot_hash_16(&self) -> String {
        self.content_hash()[..16].to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Block,
}

/// Result of `evaluate` (spec §4.2 contract).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub decision: PolicyDecision,
    pub reason_code: Option<String>,
    pub rule_id: Option<String>,
    pub policy_version: String,
    pub policy_snapshot_hash: String,
}

/// Pure, deterministic evaluation of `order` against `bundle`'s rules, in
/// order, first match wins. A bundle with no matching rule defaults to
/// ALLOW — a closed policy bundle is expected to end with a catch-all rule;
/// absent one, silence is not a rejection in this layer (the shadow ledger
/// is the backstop for unbounded exposure).
pub fn evaluate(order: &Order, exposure: &ExposureContext, bundle: &PolicyBundle) -> PolicyOutcome {
    let policy_snapshot_hash = bundle.snapshot_hash_16();
    for rule in &bundle.rules {
        if (rule.predicate)(order, exposure) {
            return PolicyOutcome {
                decision: match rule.action {
                    RuleAction::Allow => PolicyDecision::Allow,
                    RuleAction::Block => PolicyDecision::Block,
                },
                reason_code: match rule.action {
                    RuleAction::Allow => None,
                    RuleAction::Block => Some("POLICY_BLOCKED".to_string()),
                },
                rule_id: Some(rule.rule_id.clone()),
                policy_version: bundle.version.clone(),
                policy_snapshot_hash,
            };
        }
    }

    PolicyOutcome {
        decision: PolicyDecision::Allow,
        reason_code: None,
        rule_id: None,
        policy_version: bundle.version.clone(),
        policy_snapshot_hash,
    }
}

fn always_true(_order: &Order, _exposure: &ExposureContext) -> bool {
    true
}

/// A single-rule bundle that allows everything — the natural default policy
/// before an operator loads a real bundle.
pub fn default_allow_bundle(version: impl Into<String>) -> PolicyBundle {
    PolicyBundle {
        version: version.into(),
        rules: vec![PolicyRule {
            rule_id: "default-allow".to_string(),
            predicate: always_true,
            action: RuleAction::Allow,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order {
            client_order_id: "ORDER-001".to_string(),
            symbol: "AAPL".to_string(),
            side: Side::Buy,
            qty: 100,
            price: Some(185.50),
        }
    }

    fn sell_only_block(_order: &Order, _exposure: &ExposureContext) -> bool {
        false
    }

    #[test]
    fn evaluate_is_deterministic() {
        let bundle = default_allow_bundle("v1");
        let ctx = ExposureContext {
            current_gross: 0.0,
            current_net: 0.0,
            pending: 0.0,
        };
        let order = sample_order();
        assert_eq!(evaluate(&order, &ctx, &bundle), evaluate(&order, &ctx, &bundle));
    }

    #[test]
    fn first_match_wins() {
        let bundle = PolicyBundle {
            version: "v1".to_string(),
            rules: vec![
                PolicyRule {
                    rule_id: "r1-allow".to_string(),
                    predicate: always_true,
                    action: RuleAction::Allow,
                },
                PolicyRule {
                    rule_id: "r2-block-unreachable".to_string(),
                    predicate: always_true,
                    action: RuleAction::Block,
                },
            ],
        };
        let ctx = ExposureContext {
            current_gross: 0.0,
            current_net: 0.0,
            pending: 0.0,
        };
        let outcome = evaluate(&sample_order(), &ctx, &bundle);
        assert_eq!(outcome.decision, PolicyDecision::Allow);
        assert_eq!(outcome.rule_id.as_deref(), Some("r1-allow"));
    }

    #[test]
    fn no_match_defaults_allow() {
        let bundle = PolicyBundle {
            version: "v1".to_string(),
            rules: vec![PolicyRule {
                rule_id: "never-matches".to_string(),
                predicate: sell_only_block,
                action: RuleAction::Block,
            }],
        };
        let ctx = ExposureContext {
            current_gross: 0.0,
            current_net: 0.0,
            pending: 0.0,
        };
        let outcome = evaluate(&sample_order(), &ctx, &bundle);
        assert_eq!(outcome.decision, PolicyDecision::Allow);
        assert_eq!(outcome.rule_id, None);
    }

    #[test]
    fn snapshot_hash_is_16_hex_prefix_of_64_hex_content_hash() {
        let bundle = default_allow_bundle("v1");
        let full = bundle.content_hash();
        let short = bundle.snapshot_hash_16();
        assert_eq!(full.len(), 64);
        assert_eq!(short.len(), 16);
        assert_eq!(&full[..16], short);
    }
}
