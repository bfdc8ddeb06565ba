//! Rule resolver (§4.C): routing clauses, tactics, and smart-routing
//! overrides, plus the lookup that turns (scenario, request-model,
//! RequestContext) into an effective service list.

use crate::error::RuleError;
use crate::model::{RequestContext, Scenario};
use crate::smart_routing::SmartOp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Load-balancing strategy, closed variant with per-case params (§3, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tactic {
    RoundRobin,
    TokenBased { tokens_per_window: u64 },
    Hybrid { max_requests: u64, max_tokens: u64 },
    Random,
    LatencyBased {
        #[serde(default = "default_min_samples")]
        min_samples: usize,
        #[serde(default = "default_explore_ratio")]
        explore_ratio: f64,
    },
    SpeedBased {
        #[serde(default = "default_min_samples")]
        min_samples: usize,
        #[serde(default = "default_explore_ratio")]
        explore_ratio: f64,
    },
    Adaptive {
        w_lat: f64,
        w_load: f64,
        w_speed: f64,
    },
}

fn default_min_samples() -> usize {
    20
}

fn default_explore_ratio() -> f64 {
    0.1
}

/// A service reference within a rule's ordered candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRef {
    pub provider_id: Uuid,
    pub model: String,
    pub weight: u32,
}

/// A predicate-gated override of a rule's default services (§3 SmartRouting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartRoutingRule {
    pub description: String,
    pub ops: Vec<SmartOp>,
    pub services: Vec<ServiceRef>,
}

/// A routing clause: (scenario, request-model) → ordered services + tactic,
/// with an optional smart-routing override list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub scenario: Scenario,
    pub request_model: String,
    pub response_model: String,
    pub description: String,
    pub active: bool,
    pub tactic: Tactic,
    pub services: Vec<ServiceRef>,
    pub smart_routing: Vec<SmartRoutingRule>,
}

/// Outcome of rule resolution: the matched rule's tactic plus the effective
/// (possibly smart-routing-overridden) service list.
pub struct ResolvedRule<'a> {
    pub rule: &'a Rule,
    pub services: &'a [ServiceRef],
}

/// Resolves (scenario, request-model, RequestContext) against a flat set of
/// rules. Holds no mutable state — rules are config-layer-owned and
/// read-only for the lifetime of a request.
pub struct RuleResolver<'a> {
    rules: &'a [Rule],
}

impl<'a> RuleResolver<'a> {
    pub fn new(rules: &'a [Rule]) -> Self {
        Self { rules }
    }

    /// Exactly one active rule is expected per (scenario, request-model);
    /// the config loader's validation pass (§10.3) enforces that invariant
    /// at load time, so resolution here only has to pick the single match.
    pub fn resolve(
        &self,
        scenario: &Scenario,
        request_model: &str,
        ctx: &RequestContext,
    ) -> Result<ResolvedRule<'a>, RuleError> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.active && &r.scenario == scenario && r.request_model == request_model)
            .ok_or_else(|| RuleError::NoRule {
                scenario: scenario.to_string(),
                request_model: request_model.to_string(),
            })?;

        for smart in &rule.smart_routing {
            if smart.ops.iter().all(|op| op.evaluate(ctx)) {
                return Ok(ResolvedRule {
                    rule,
                    services: smart.services_as_slice(),
                });
            }
        }

        Ok(ResolvedRule {
            rule,
            services: rule.services.as_slice(),
        })
    }
}

impl SmartRoutingRule {
    /// Smart routing overrides the parent rule's *service list* only; the
    /// parent rule's tactic still applies afterward (§9 Open Question i).
    fn services_as_slice(&self) -> &[ServiceRef] {
        &self.services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart_routing::{SmartOpPosition, SmartOpValue};

    fn provider_id() -> Uuid {
        Uuid::nil()
    }

    fn base_rule() -> Rule {
        Rule {
            id: Uuid::new_v4(),
            scenario: Scenario::Openai,
            request_model: "gpt-4o".to_string(),
            response_model: "gpt-4o".to_string(),
            description: "default openai rule".to_string(),
            active: true,
            tactic: Tactic::RoundRobin,
            services: vec![ServiceRef {
                provider_id: provider_id(),
                model: "gpt-4o".to_string(),
                weight: 1,
            }],
            smart_routing: vec![],
        }
    }

    #[test]
    fn resolves_default_services_with_no_smart_routing() {
        let rule = base_rule();
        let rules = vec![rule];
        let resolver = RuleResolver::new(&rules);
        let ctx = RequestContext::default();
        let resolved = resolver
            .resolve(&Scenario::Openai, "gpt-4o", &ctx)
            .expect("rule found");
        assert_eq!(resolved.services.len(), 1);
        assert_eq!(resolved.services[0].model, "gpt-4o");
    }

    #[test]
    fn no_rule_error_for_unknown_request_model() {
        let rule = base_rule();
        let rules = vec![rule];
        let resolver = RuleResolver::new(&rules);
        let ctx = RequestContext::default();
        let err = resolver
            .resolve(&Scenario::Openai, "unknown-model", &ctx)
            .unwrap_err();
        matches!(err, RuleError::NoRule { .. });
    }

    #[test]
    fn smart_routing_overrides_services_by_token_count() {
        let mut rule = base_rule();
        rule.smart_routing.push(SmartRoutingRule {
            description: "long context".to_string(),
            ops: vec![SmartOp {
                position: SmartOpPosition::Token,
                operation: "ge".to_string(),
                value: SmartOpValue::Int(6000),
            }],
            services: vec![ServiceRef {
                provider_id: provider_id(),
                model: "long-ctx-model".to_string(),
                weight: 1,
            }],
        });
        let rules = vec![rule];
        let resolver = RuleResolver::new(&rules);

        let mut ctx = RequestContext::default();
        ctx.estimated_tokens = 7000;
        let resolved = resolver
            .resolve(&Scenario::Openai, "gpt-4o", &ctx)
            .expect("rule found");
        assert_eq!(resolved.services[0].model, "long-ctx-model");

        ctx.estimated_tokens = 10;
        let resolved = resolver
            .resolve(&Scenario::Openai, "gpt-4o", &ctx)
            .expect("rule found");
        assert_eq!(resolved.services[0].model, "gpt-4o");
    }
}
