//! Smart-routing evaluator (§4.D): a closed predicate DSL over
//! [`RequestContext`], validated at load time and evaluated purely at
//! request time. Evaluation errors (e.g. a bad glob pattern) log and yield
//! `false` for that op rather than failing the request.

use crate::error::RuleError;
use crate::model::RequestContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmartOpPosition {
    Model,
    Thinking,
    System,
    User,
    ToolUse,
    Token,
}

/// The declared type of a predicate's `value`, used to validate parsing at
/// load time independent of the raw wire representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SmartOpValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl SmartOpValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            SmartOpValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            SmartOpValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_bool_or_empty_true(&self) -> bool {
        match self {
            SmartOpValue::Bool(b) => *b,
            SmartOpValue::Str(s) if s.is_empty() => true,
            SmartOpValue::Str(s) => s.eq_ignore_ascii_case("true"),
            SmartOpValue::Int(i) => *i != 0,
        }
    }
}

/// One predicate: `{ position, operation, value }`, admissible combinations
/// enumerated in §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartOp {
    pub position: SmartOpPosition,
    pub operation: String,
    pub value: SmartOpValue,
}

/// The closed set of (position, operation) pairs the DSL accepts. Used by
/// [`validate`] so that every other pair fails load-time validation, as
/// required by the "SmartOp validation is total" testable property (§8).
fn admissible_operations(position: &SmartOpPosition) -> &'static [&'static str] {
    match position {
        SmartOpPosition::Model => &["contains", "glob", "equals"],
        SmartOpPosition::Thinking => &["enabled", "disabled"],
        SmartOpPosition::System => &["any_contains", "regex"],
        SmartOpPosition::User => &["any_contains", "contains", "regex", "type"],
        SmartOpPosition::ToolUse => &["equals", "contains"],
        SmartOpPosition::Token => &["ge", "gt", "le", "lt"],
    }
}

/// Load-time validation: position/operation membership and value-type
/// agreement. Validation failures fail loudly (unlike evaluation failures).
pub fn validate(op: &SmartOp) -> Result<(), RuleError> {
    if !admissible_operations(&op.position).contains(&op.operation.as_str()) {
        return Err(RuleError::InvalidSmartOp {
            position: format!("{:?}", op.position),
            operation: op.operation.clone(),
        });
    }

    let expected = match op.position {
        SmartOpPosition::Thinking => "bool",
        SmartOpPosition::Token => "int",
        _ => "string",
    };

    let ok = match expected {
        "bool" => matches!(op.value, SmartOpValue::Bool(_) | SmartOpValue::Str(_)),
        "int" => op.value.as_int().is_some(),
        _ => op.value.as_str().is_some(),
    };

    if !ok {
        return Err(RuleError::BadSmartOpValue {
            expected,
            value: format!("{:?}", op.value),
        });
    }
    Ok(())
}

/// Compile a glob pattern (`*`/`?`) into a matcher. Kept deliberately small
/// (the spec treats "regex" as "glob with substring fallback") rather than
/// pulling in a full regex engine for a predicate language this narrow.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => {
                (0..=t.len()).any(|i| helper(&p[1..], &t[i..]))
            }
            Some(b'?') => !t.is_empty() && helper(&p[1..], &t[1..]),
            Some(&c) => t.first() == Some(&c) && helper(&p[1..], &t[1..]),
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}

impl SmartOp {
    /// Pure evaluation over a [`RequestContext`]. AND-combined with sibling
    /// ops by the caller (the rule resolver); a single op here never fails
    /// the request — a malformed pattern logs and evaluates to `false`.
    pub fn evaluate(&self, ctx: &RequestContext) -> bool {
        match self.position {
            SmartOpPosition::Model => self.eval_model(&ctx.model),
            SmartOpPosition::Thinking => self.eval_thinking(ctx.thinking_enabled),
            SmartOpPosition::System => self.eval_system(&ctx.system_joined()),
            SmartOpPosition::User => self.eval_user(ctx),
            SmartOpPosition::ToolUse => self.eval_tool_use(&ctx.tool_use_names),
            SmartOpPosition::Token => self.eval_token(ctx.estimated_tokens),
        }
    }

    fn eval_model(&self, model: &str) -> bool {
        let Some(value) = self.value.as_str() else {
            return false;
        };
        match self.operation.as_str() {
            "contains" => model.contains(value),
            "equals" => model == value,
            "glob" => {
                if value.is_empty() {
                    tracing::warn!("empty glob pattern for model op");
                    return false;
                }
                glob_match(value, model)
            }
            _ => false,
        }
    }

    fn eval_thinking(&self, thinking_enabled: bool) -> bool {
        let want_true = self.value.as_bool_or_empty_true();
        match self.operation.as_str() {
            "enabled" => thinking_enabled == want_true,
            "disabled" => thinking_enabled != want_true,
            _ => false,
        }
    }

    fn eval_system(&self, joined: &str) -> bool {
        let Some(value) = self.value.as_str() else {
            return false;
        };
        match self.operation.as_str() {
            "any_contains" => joined.contains(value),
            "regex" => {
                if glob_match(value, joined) {
                    true
                } else {
                    joined.contains(value)
                }
            }
            _ => false,
        }
    }

    fn eval_user(&self, ctx: &RequestContext) -> bool {
        let Some(value) = self.value.as_str() else {
            return false;
        };
        match self.operation.as_str() {
            "any_contains" => ctx.user_messages.iter().any(|m| m.contains(value)),
            "regex" => ctx.user_messages.iter().any(|m| {
                if glob_match(value, m) {
                    true
                } else {
                    m.contains(value)
                }
            }),
            "contains" => {
                ctx.latest_role.as_deref() == Some("user")
                    && ctx
                        .user_messages
                        .last()
                        .is_some_and(|m| m.contains(value))
            }
            "type" => ctx.latest_content_type.as_deref() == Some(value),
            _ => false,
        }
    }

    fn eval_tool_use(&self, names: &[String]) -> bool {
        let Some(value) = self.value.as_str() else {
            return false;
        };
        match self.operation.as_str() {
            "equals" => names.iter().any(|n| n == value),
            "contains" => names.iter().any(|n| n.contains(value)),
            _ => false,
        }
    }

    fn eval_token(&self, estimated_tokens: u32) -> bool {
        let Some(value) = self.value.as_int() else {
            return false;
        };
        let tokens = estimated_tokens as i64;
        match self.operation.as_str() {
            "ge" => tokens >= value,
            "gt" => tokens > value,
            "le" => tokens <= value,
            "lt" => tokens < value,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_tokens(n: u32) -> RequestContext {
        RequestContext {
            estimated_tokens: n,
            ..Default::default()
        }
    }

    #[test]
    fn every_spec_pair_validates() {
        let pairs: &[(SmartOpPosition, &str, SmartOpValue)] = &[
            (SmartOpPosition::Model, "contains", SmartOpValue::Str("x".into())),
            (SmartOpPosition::Model, "glob", SmartOpValue::Str("x*".into())),
            (SmartOpPosition::Model, "equals", SmartOpValue::Str("x".into())),
            (SmartOpPosition::Thinking, "enabled", SmartOpValue::Bool(true)),
            (SmartOpPosition::Thinking, "disabled", SmartOpValue::Bool(true)),
            (SmartOpPosition::System, "any_contains", SmartOpValue::Str("x".into())),
            (SmartOpPosition::System, "regex", SmartOpValue::Str("x".into())),
            (SmartOpPosition::User, "any_contains", SmartOpValue::Str("x".into())),
            (SmartOpPosition::User, "contains", SmartOpValue::Str("x".into())),
            (SmartOpPosition::User, "regex", SmartOpValue::Str("x".into())),
            (SmartOpPosition::User, "type", SmartOpValue::Str("image".into())),
            (SmartOpPosition::ToolUse, "equals", SmartOpValue::Str("x".into())),
            (SmartOpPosition::ToolUse, "contains", SmartOpValue::Str("x".into())),
            (SmartOpPosition::Token, "ge", SmartOpValue::Int(1)),
            (SmartOpPosition::Token, "gt", SmartOpValue::Int(1)),
            (SmartOpPosition::Token, "le", SmartOpValue::Int(1)),
            (SmartOpPosition::Token, "lt", SmartOpValue::Int(1)),
        ];
        for (position, operation, value) in pairs {
            let op = SmartOp {
                position: position.clone(),
                operation: operation.to_string(),
                value: value.clone(),
            };
            assert!(validate(&op).is_ok(), "{position:?}.{operation} should validate");
        }
    }

    #[test]
    fn every_other_pair_fails_validation() {
        let op = SmartOp {
            position: SmartOpPosition::Model,
            operation: "ge".to_string(),
            value: SmartOpValue::Int(1),
        };
        assert!(validate(&op).is_err());

        let op = SmartOp {
            position: SmartOpPosition::Token,
            operation: "contains".to_string(),
            value: SmartOpValue::Str("x".into()),
        };
        assert!(validate(&op).is_err());
    }

    #[test]
    fn token_predicates_compare_against_estimate() {
        let ctx = ctx_with_tokens(6000);
        let ge = SmartOp {
            position: SmartOpPosition::Token,
            operation: "ge".to_string(),
            value: SmartOpValue::Int(6000),
        };
        assert!(ge.evaluate(&ctx));

        let ctx = ctx_with_tokens(10);
        assert!(!ge.evaluate(&ctx));
    }

    #[test]
    fn model_glob_matches_wildcard_patterns() {
        let op = SmartOp {
            position: SmartOpPosition::Model,
            operation: "glob".to_string(),
            value: SmartOpValue::Str("gemini-2*".into()),
        };
        let ctx = RequestContext {
            model: "gemini-2.5-pro".to_string(),
            ..Default::default()
        };
        assert!(op.evaluate(&ctx));
        let ctx = RequestContext {
            model: "gemini-3.0".to_string(),
            ..Default::default()
        };
        assert!(!op.evaluate(&ctx));
    }

    #[test]
    fn user_contains_requires_latest_role_user() {
        let op = SmartOp {
            position: SmartOpPosition::User,
            operation: "contains".to_string(),
            value: SmartOpValue::Str("hello".into()),
        };
        let ctx = RequestContext {
            latest_role: Some("assistant".to_string()),
            user_messages: vec!["hello world".to_string()],
            ..Default::default()
        };
        assert!(!op.evaluate(&ctx));

        let ctx = RequestContext {
            latest_role: Some("user".to_string()),
            user_messages: vec!["hello world".to_string()],
            ..Default::default()
        };
        assert!(op.evaluate(&ctx));
    }
}
