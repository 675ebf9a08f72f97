//! Default rule set
//!
//! Canonical priority order (lower runs earlier):
//!
//! | prio | rule | effect when failed |
//! |-----:|------|--------------------|
//! | 10 | break-glass-override | short-circuit approve |
//! | 20 | budget-caps | deny + narrowScope |
//! | 30 | window-size-limit | downgrade to skeleton |
//! | 40 | identifiers-required | downgrade to skeleton |
//! | 50 | default-deny-raw | skeleton or hotpath |

use serde_json::json;

use crate::config::PolicyConfig;
use crate::shared::models::Result;

use super::{
    Decision, Evidence, NextBestAction, PolicyCtx, PolicyRule, RequestType, RuleOutcome,
};

/// Exact prefix an operator must use to trip the override.
pub const BREAK_GLASS_PREFIX: &str = "BREAK-GLASS:";

pub fn default_rules() -> Vec<Box<dyn PolicyRule>> {
    vec![
        Box::new(BreakGlassOverride),
        Box::new(BudgetCaps),
        Box::new(WindowSizeLimit),
        Box::new(IdentifiersRequired),
        Box::new(DefaultDenyRaw),
    ]
}

struct BreakGlassOverride;

impl PolicyRule for BreakGlassOverride {
    fn name(&self) -> &'static str {
        "break-glass-override"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn evaluate(&self, ctx: &PolicyCtx, config: &PolicyConfig) -> Result<RuleOutcome> {
        if !ctx.reason.starts_with(BREAK_GLASS_PREFIX) {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "triggered": false }),
            )]));
        }
        if !config.allow_break_glass {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "break-glass-disallowed",
                json!({ "reason": ctx.reason }),
            )]));
        }
        // always audited, never silent
        Ok(RuleOutcome {
            passed: true,
            evidence: vec![Evidence::new(
                self.name(),
                "break-glass-triggered",
                json!({ "reason": ctx.reason }),
            )],
            decision: Some(Decision::Approve),
            denied_reason: None,
            next_best_action: None,
            short_circuit: true,
        })
    }
}

struct BudgetCaps;

impl PolicyRule for BudgetCaps {
    fn name(&self) -> &'static str {
        "budget-caps"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn evaluate(&self, ctx: &PolicyCtx, config: &PolicyConfig) -> Result<RuleOutcome> {
        if ctx.request_type != RequestType::GraphSlice {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "applicable": false }),
            )]));
        }
        let cards = ctx.budget_max_cards.unwrap_or(0);
        let tokens = ctx.budget_max_tokens.unwrap_or(0);
        let over = cards > config.slice_max_cards || tokens > config.slice_max_tokens;
        if !over {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "maxCards": cards, "maxEstimatedTokens": tokens }),
            )]));
        }
        Ok(RuleOutcome::fail(
            vec![Evidence::new(
                self.name(),
                "budget-exceeded",
                json!({
                    "maxCards": cards,
                    "maxEstimatedTokens": tokens,
                    "cardCap": config.slice_max_cards,
                    "tokenCap": config.slice_max_tokens,
                }),
            )],
            Decision::Deny,
            format!(
                "slice budget exceeds caps ({cards} cards / {tokens} tokens)"
            ),
            NextBestAction::NarrowScope,
        ))
    }
}

struct WindowSizeLimit;

impl PolicyRule for WindowSizeLimit {
    fn name(&self) -> &'static str {
        "window-size-limit"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn evaluate(&self, ctx: &PolicyCtx, config: &PolicyConfig) -> Result<RuleOutcome> {
        if ctx.request_type != RequestType::CodeWindow {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "applicable": false }),
            )]));
        }
        let lines = ctx.window_lines.unwrap_or(0);
        let tokens = ctx.window_tokens.unwrap_or(0);
        let over = lines > config.max_window_lines || tokens > config.max_window_tokens;
        if !over {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "windowLines": lines, "windowTokens": tokens }),
            )]));
        }
        Ok(RuleOutcome::fail(
            vec![Evidence::new(
                self.name(),
                "window-too-large",
                json!({
                    "windowLines": lines,
                    "windowTokens": tokens,
                    "lineCap": config.max_window_lines,
                    "tokenCap": config.max_window_tokens,
                }),
            )],
            Decision::DowngradeToSkeleton,
            format!("requested window {lines} lines / {tokens} tokens exceeds limits"),
            NextBestAction::RequestSkeleton,
        ))
    }
}

struct IdentifiersRequired;

impl PolicyRule for IdentifiersRequired {
    fn name(&self) -> &'static str {
        "identifiers-required"
    }

    fn priority(&self) -> u32 {
        40
    }

    fn enabled(&self, config: &PolicyConfig) -> bool {
        config.require_identifiers
    }

    fn evaluate(&self, ctx: &PolicyCtx, _config: &PolicyConfig) -> Result<RuleOutcome> {
        if ctx.request_type != RequestType::CodeWindow {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "applicable": false }),
            )]));
        }
        if !ctx.identifiers_to_find.is_empty() {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "identifierCount": ctx.identifiers_to_find.len() }),
            )]));
        }
        Ok(RuleOutcome::fail(
            vec![Evidence::new(
                self.name(),
                "identifiers-missing",
                json!({ "identifierCount": 0 }),
            )],
            Decision::DowngradeToSkeleton,
            "identifiersToFind is required for raw code windows",
            NextBestAction::ProvideIdentifiersToFind,
        ))
    }
}

struct DefaultDenyRaw;

impl PolicyRule for DefaultDenyRaw {
    fn name(&self) -> &'static str {
        "default-deny-raw"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn enabled(&self, config: &PolicyConfig) -> bool {
        config.default_deny_raw
    }

    fn evaluate(&self, ctx: &PolicyCtx, _config: &PolicyConfig) -> Result<RuleOutcome> {
        if ctx.request_type != RequestType::CodeWindow {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "applicable": false }),
            )]));
        }
        // trusts the caller-asserted slice context; see DESIGN.md
        let in_slice = ctx
            .symbol_id
            .as_ref()
            .map_or(false, |id| ctx.slice_symbol_ids.contains(id));
        if in_slice {
            return Ok(RuleOutcome::pass(vec![Evidence::new(
                self.name(),
                "checked",
                json!({ "inSlice": true }),
            )]));
        }

        let evidence = vec![Evidence::new(
            self.name(),
            "not-in-slice",
            json!({
                "symbolId": ctx.symbol_id,
                "sliceSize": ctx.slice_symbol_ids.len(),
            }),
        )];
        if ctx.identifiers_to_find.is_empty() {
            Ok(RuleOutcome::fail(
                evidence,
                Decision::DowngradeToSkeleton,
                "symbol is outside the provided slice context",
                NextBestAction::RequestSkeleton,
            ))
        } else {
            Ok(RuleOutcome::fail(
                evidence,
                Decision::DowngradeToHotpath,
                "symbol is outside the provided slice context",
                NextBestAction::RequestHotPath,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::policy::evaluate;

    fn window_ctx() -> PolicyCtx {
        PolicyCtx {
            repo_id: "acme".into(),
            request_type: RequestType::CodeWindow,
            symbol_id: Some("sym:target".into()),
            reason: "inspect handler".into(),
            identifiers_to_find: vec![],
            slice_symbol_ids: vec![],
            budget_max_cards: None,
            budget_max_tokens: None,
            window_lines: Some(80),
            window_tokens: Some(600),
        }
    }

    #[test]
    fn test_break_glass_short_circuits() {
        let mut config = PolicyConfig::default();
        config.allow_break_glass = true;
        let mut ctx = window_ctx();
        ctx.reason = "BREAK-GLASS: incident 4712".into();

        let result = evaluate(&default_rules(), &config, &ctx);
        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].evidence_type, "break-glass-triggered");
    }

    #[test]
    fn test_break_glass_needs_config() {
        let config = PolicyConfig::default(); // allow_break_glass = false
        let mut ctx = window_ctx();
        ctx.reason = "BREAK-GLASS: incident 4712".into();
        ctx.identifiers_to_find = vec!["foo".into()];

        let result = evaluate(&default_rules(), &config, &ctx);
        // falls through to default-deny-raw
        assert_eq!(result.decision, Decision::DowngradeToHotpath);
        assert!(result
            .evidence
            .iter()
            .any(|e| e.evidence_type == "break-glass-disallowed"));
    }

    #[test]
    fn test_budget_caps_deny() {
        let config = PolicyConfig::default();
        let ctx = PolicyCtx {
            repo_id: "acme".into(),
            request_type: RequestType::GraphSlice,
            symbol_id: None,
            reason: "wide slice".into(),
            identifiers_to_find: vec![],
            slice_symbol_ids: vec![],
            budget_max_cards: Some(61),
            budget_max_tokens: Some(9000),
            window_lines: None,
            window_tokens: None,
        };

        let result = evaluate(&default_rules(), &config, &ctx);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.next_best_action, Some(NextBestAction::NarrowScope));
        assert!(!result.denied_reasons.is_empty());
    }

    #[test]
    fn test_window_size_downgrade() {
        let config = PolicyConfig::default();
        let mut ctx = window_ctx();
        ctx.window_lines = Some(240);
        ctx.identifiers_to_find = vec!["foo".into()];
        ctx.slice_symbol_ids = vec!["sym:target".into()];

        let result = evaluate(&default_rules(), &config, &ctx);
        assert_eq!(result.decision, Decision::DowngradeToSkeleton);
        assert_eq!(result.downgrade_target.as_deref(), Some("skeleton"));
        assert_eq!(result.next_best_action, Some(NextBestAction::RequestSkeleton));
    }

    #[test]
    fn test_identifiers_required_downgrade() {
        let config = PolicyConfig::default();
        let mut ctx = window_ctx();
        ctx.slice_symbol_ids = vec!["sym:target".into()];
        // identifiers empty

        let result = evaluate(&default_rules(), &config, &ctx);
        assert_eq!(result.decision, Decision::DowngradeToSkeleton);
        assert_eq!(
            result.next_best_action,
            Some(NextBestAction::ProvideIdentifiersToFind)
        );
    }

    #[test]
    fn test_out_of_slice_with_identifiers_goes_hotpath() {
        let config = PolicyConfig::default();
        let mut ctx = window_ctx();
        ctx.identifiers_to_find = vec!["foo".into()];
        // slice context does not include sym:target

        let result = evaluate(&default_rules(), &config, &ctx);
        assert_eq!(result.decision, Decision::DowngradeToHotpath);
        assert_eq!(result.next_best_action, Some(NextBestAction::RequestHotPath));
        assert!(!result.audit_hash.is_empty());
    }

    #[test]
    fn test_in_slice_with_identifiers_approved() {
        let config = PolicyConfig::default();
        let mut ctx = window_ctx();
        ctx.identifiers_to_find = vec!["foo".into()];
        ctx.slice_symbol_ids = vec!["sym:target".into()];

        let result = evaluate(&default_rules(), &config, &ctx);
        assert_eq!(result.decision, Decision::Approve);
        assert!(result.next_best_action.is_none());
        // every traversed rule left evidence
        assert_eq!(result.evidence.len(), 5);
    }
}
