//! Policy engine
//!
//! A priority-sorted pipeline of trait-object rules deciding whether raw
//! code may be returned. The engine itself is stateless: evaluation is a
//! pure function of `(rules, config, ctx)`, and the audit hash covers the
//! decision, every piece of evidence in evaluation order, and the
//! normalized context.

pub mod rules;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::PolicyConfig;
use crate::shared::models::Result;

pub use rules::default_rules;

/// Decision lattice, least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Approve,
    DowngradeToHotpath,
    DowngradeToSkeleton,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::DowngradeToHotpath => "downgrade-to-hotpath",
            Decision::DowngradeToSkeleton => "downgrade-to-skeleton",
            Decision::Deny => "deny",
        }
    }

    /// Downgrade target shipped to the client, when applicable.
    pub fn downgrade_target(&self) -> Option<&'static str> {
        match self {
            Decision::DowngradeToHotpath => Some("hotpath"),
            Decision::DowngradeToSkeleton => Some("skeleton"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestType {
    GraphSlice,
    CodeWindow,
}

/// Minimum fields the client must supply to succeed next time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NextBestAction {
    RequestSkeleton,
    RequestHotPath,
    NarrowScope,
    ProvideIdentifiersToFind,
}

impl NextBestAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextBestAction::RequestSkeleton => "requestSkeleton",
            NextBestAction::RequestHotPath => "requestHotPath",
            NextBestAction::NarrowScope => "narrowScope",
            NextBestAction::ProvideIdentifiersToFind => "provideIdentifiersToFind",
        }
    }
}

/// Evaluation context, normalized into the audit hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCtx {
    pub repo_id: String,
    pub request_type: RequestType,
    #[serde(default)]
    pub symbol_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub identifiers_to_find: Vec<String>,
    /// Caller-asserted slice context (symbol ids)
    #[serde(default)]
    pub slice_symbol_ids: Vec<String>,
    #[serde(default)]
    pub budget_max_cards: Option<u32>,
    #[serde(default)]
    pub budget_max_tokens: Option<u32>,
    #[serde(default)]
    pub window_lines: Option<u32>,
    #[serde(default)]
    pub window_tokens: Option<u32>,
}

/// One evidence record; rules emit these in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub rule: String,
    #[serde(rename = "type")]
    pub evidence_type: String,
    pub detail: serde_json::Value,
}

impl Evidence {
    pub fn new(rule: &str, evidence_type: &str, detail: serde_json::Value) -> Self {
        Self {
            rule: rule.to_string(),
            evidence_type: evidence_type.to_string(),
            detail,
        }
    }
}

/// Outcome of one rule evaluation.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub passed: bool,
    pub evidence: Vec<Evidence>,
    /// Decision demanded when the rule failed
    pub decision: Option<Decision>,
    pub denied_reason: Option<String>,
    pub next_best_action: Option<NextBestAction>,
    /// Stop the pipeline with this outcome (break-glass)
    pub short_circuit: bool,
}

impl RuleOutcome {
    pub fn pass(evidence: Vec<Evidence>) -> Self {
        Self {
            passed: true,
            evidence,
            decision: None,
            denied_reason: None,
            next_best_action: None,
            short_circuit: false,
        }
    }

    pub fn fail(
        evidence: Vec<Evidence>,
        decision: Decision,
        denied_reason: impl Into<String>,
        next_best_action: NextBestAction,
    ) -> Self {
        Self {
            passed: false,
            evidence,
            decision: Some(decision),
            denied_reason: Some(denied_reason.into()),
            next_best_action: Some(next_best_action),
            short_circuit: false,
        }
    }
}

/// One evaluable rule.
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;
    /// Lower runs earlier.
    fn priority(&self) -> u32;
    fn enabled(&self, _config: &PolicyConfig) -> bool {
        true
    }
    fn evaluate(&self, ctx: &PolicyCtx, config: &PolicyConfig) -> Result<RuleOutcome>;
}

/// Final decision shipped to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub evidence: Vec<Evidence>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub denied_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_best_action: Option<NextBestAction>,
    /// 64-hex SHA-256 over (decision, evidence, normalized ctx)
    pub audit_hash: String,
}

/// Run the pipeline: rules in priority order, most restrictive decision
/// wins, rule errors append evidence and continue.
pub fn evaluate(
    rules: &[Box<dyn PolicyRule>],
    config: &PolicyConfig,
    ctx: &PolicyCtx,
) -> PolicyDecision {
    let mut order: Vec<&Box<dyn PolicyRule>> = rules.iter().collect();
    order.sort_by_key(|r| (r.priority(), r.name()));

    let mut decision = Decision::Approve;
    let mut evidence: Vec<Evidence> = Vec::new();
    let mut denied_reasons: Vec<String> = Vec::new();
    let mut next_best_action: Option<NextBestAction> = None;

    for rule in order {
        if !rule.enabled(config) {
            continue;
        }
        match rule.evaluate(ctx, config) {
            Ok(outcome) => {
                evidence.extend(outcome.evidence);
                if outcome.short_circuit {
                    decision = outcome.decision.unwrap_or(Decision::Approve);
                    denied_reasons.clear();
                    next_best_action = None;
                    break;
                }
                if !outcome.passed {
                    if let Some(reason) = outcome.denied_reason {
                        denied_reasons.push(reason);
                    }
                    if let Some(demanded) = outcome.decision {
                        if demanded > decision {
                            decision = demanded;
                            next_best_action = outcome.next_best_action;
                        }
                    }
                }
            }
            Err(err) => {
                evidence.push(Evidence::new(
                    rule.name(),
                    "rule-error",
                    serde_json::json!({ "message": err.to_string() }),
                ));
            }
        }
    }

    let audit_hash = audit_hash(decision, &evidence, ctx);
    debug!(
        decision = decision.as_str(),
        rules = evidence.len(),
        audit = %audit_hash,
        "policy evaluated"
    );

    PolicyDecision {
        decision,
        downgrade_target: decision.downgrade_target().map(String::from),
        evidence,
        denied_reasons,
        next_best_action,
        audit_hash,
    }
}

/// Recursively key-sorted JSON rendering; object key order can never change
/// the audit hash.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: std::collections::BTreeMap<&String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k, sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or_default()
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

fn audit_hash(decision: Decision, evidence: &[Evidence], ctx: &PolicyCtx) -> String {
    let mut normalized = ctx.clone();
    normalized.identifiers_to_find.sort();
    normalized.slice_symbol_ids.sort();

    let evidence_json = serde_json::to_value(evidence).unwrap_or_default();
    let ctx_json = serde_json::to_value(&normalized).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(decision.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(&evidence_json).as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(&ctx_json).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(request_type: RequestType) -> PolicyCtx {
        PolicyCtx {
            repo_id: "acme".into(),
            request_type,
            symbol_id: Some("sym:a".into()),
            reason: "debugging".into(),
            identifiers_to_find: vec![],
            slice_symbol_ids: vec![],
            budget_max_cards: None,
            budget_max_tokens: None,
            window_lines: None,
            window_tokens: None,
        }
    }

    #[test]
    fn test_decision_ordering() {
        assert!(Decision::Approve < Decision::DowngradeToHotpath);
        assert!(Decision::DowngradeToHotpath < Decision::DowngradeToSkeleton);
        assert!(Decision::DowngradeToSkeleton < Decision::Deny);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"b":1,"a":{"z":2,"y":[{"q":1,"p":2}]}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"a":{"y":[{"p":2,"q":1}],"z":2},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_audit_hash_stable_and_sensitive() {
        let config = PolicyConfig::default();
        let rules = default_rules();
        let base = ctx(RequestType::CodeWindow);

        let first = evaluate(&rules, &config, &base);
        let second = evaluate(&rules, &config, &base);
        assert_eq!(first.audit_hash, second.audit_hash);
        assert_eq!(first.audit_hash.len(), 64);

        let mut other = base.clone();
        other.reason = "different reason".into();
        let third = evaluate(&rules, &config, &other);
        assert_ne!(first.audit_hash, third.audit_hash);
    }

    #[test]
    fn test_identifier_order_does_not_change_hash() {
        let config = PolicyConfig::default();
        let rules = default_rules();

        let mut a = ctx(RequestType::CodeWindow);
        a.identifiers_to_find = vec!["x".into(), "y".into()];
        let mut b = ctx(RequestType::CodeWindow);
        b.identifiers_to_find = vec!["y".into(), "x".into()];

        assert_eq!(
            evaluate(&rules, &config, &a).audit_hash,
            evaluate(&rules, &config, &b).audit_hash
        );
    }

    #[test]
    fn test_erroring_rule_continues_pipeline() {
        struct Exploding;
        impl PolicyRule for Exploding {
            fn name(&self) -> &'static str {
                "exploding"
            }
            fn priority(&self) -> u32 {
                5
            }
            fn evaluate(&self, _: &PolicyCtx, _: &PolicyConfig) -> Result<RuleOutcome> {
                Err(crate::shared::models::CoreError::policy("boom"))
            }
        }

        let mut rules = default_rules();
        rules.push(Box::new(Exploding));
        let config = PolicyConfig::default();
        let result = evaluate(&rules, &config, &ctx(RequestType::CodeWindow));

        assert_eq!(result.evidence[0].evidence_type, "rule-error");
        // remaining rules still evaluated
        assert!(result.evidence.len() > 1);
    }
}
