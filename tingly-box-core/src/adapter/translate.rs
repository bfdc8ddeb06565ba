//! Cross-shape intermediate representation and the normative mapping rules
//! (§4.F) that every wire-shape module translates into and out of.
//!
//! Modeled as a closed variant (`ContentBlock`) plus per-shape render/parse
//! functions — a dispatch table, not a trait hierarchy per shape.

use crate::error::AdapterError;
use crate::model::RequestContext;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One content unit within a message. `Thinking` carries the adapter-private
/// field that DeepSeek's provider transform renames to `reasoning_content`.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking(String),
    Image {
        media_type: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
pub struct UnifiedMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone)]
pub enum ToolChoice {
    Auto,
    Required,
    Named(String),
}

/// The shape-agnostic request the adapter operates on internally. Parsed
/// once from the caller's wire body, rendered once per dispatch attempt
/// into the selected provider's `api_style`.
#[derive(Debug, Clone, Default)]
pub struct UnifiedRequest {
    pub model: String,
    pub system: Vec<String>,
    pub messages: Vec<UnifiedMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub tools: Vec<Value>,
    pub tool_choice: Option<ToolChoice>,
    pub thinking_enabled: bool,
    pub stream: bool,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// OpenAI model-name prefixes that take `max_completion_tokens` instead of
/// `max_tokens` (§4.F).
const MAX_COMPLETION_TOKENS_PREFIXES: &[&str] =
    &["gpt-4o", "gpt-4o-mini", "o1-", "chatgpt-4o", "gpt-4.1"];

pub fn openai_max_tokens_field(model: &str) -> &'static str {
    if MAX_COMPLETION_TOKENS_PREFIXES
        .iter()
        .any(|p| model.starts_with(p))
    {
        "max_completion_tokens"
    } else {
        "max_tokens"
    }
}

/// Anthropic tool-choice → the generic [`ToolChoice`] the other shapes render from.
pub fn parse_anthropic_tool_choice(v: &Value) -> Option<ToolChoice> {
    match v.get("type").and_then(Value::as_str) {
        Some("auto") => Some(ToolChoice::Auto),
        Some("any") => Some(ToolChoice::Required),
        Some("tool") => v
            .get("name")
            .and_then(Value::as_str)
            .map(|n| ToolChoice::Named(n.to_string())),
        _ => Some(ToolChoice::Auto),
    }
}

pub fn render_anthropic_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => serde_json::json!({"type": "auto"}),
        ToolChoice::Required => serde_json::json!({"type": "any"}),
        ToolChoice::Named(name) => serde_json::json!({"type": "tool", "name": name}),
    }
}

pub fn render_openai_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Required => Value::String("required".to_string()),
        ToolChoice::Named(name) => {
            serde_json::json!({"type": "function", "function": {"name": name}})
        }
    }
}

impl UnifiedRequest {
    /// Derive a [`RequestContext`] for rule resolution / smart routing (§4.C, §4.D).
    pub fn to_request_context(&self) -> RequestContext {
        let mut user_messages = Vec::new();
        let mut latest_role = None;
        let mut latest_content_type = None;
        let mut tool_use_names = Vec::new();

        for msg in &self.messages {
            for block in &msg.content {
                match block {
                    ContentBlock::Text(text) => {
                        if msg.role == Role::User {
                            user_messages.push(text.clone());
                        }
                        latest_role = Some(role_str(&msg.role).to_string());
                        latest_content_type = Some("text".to_string());
                    }
                    ContentBlock::ToolUse { name, .. } => {
                        tool_use_names.push(name.clone());
                        latest_role = Some(role_str(&msg.role).to_string());
                        latest_content_type = Some("tool_use".to_string());
                    }
                    ContentBlock::ToolResult { .. } => {
                        latest_role = Some(role_str(&msg.role).to_string());
                        latest_content_type = Some("tool_result".to_string());
                    }
                    ContentBlock::Thinking(_) => {}
                    ContentBlock::Image { .. } => {
                        latest_role = Some(role_str(&msg.role).to_string());
                        latest_content_type = Some("image".to_string());
                    }
                }
            }
        }

        let estimated_tokens = RequestContext::estimate_tokens(&self.system, &user_messages);

        RequestContext {
            model: self.model.clone(),
            thinking_enabled: self.thinking_enabled,
            system_messages: self.system.clone(),
            user_messages,
            latest_role,
            latest_content_type,
            tool_use_names,
            estimated_tokens,
        }
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// The shape-agnostic response the adapter parses an upstream body into
/// before rendering it into the caller's wire shape.
#[derive(Debug, Clone, Default)]
pub struct UnifiedResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    /// (input_tokens, output_tokens), when the upstream reports usage.
    pub usage: Option<(u32, u32)>,
}

pub fn missing_field(field: &str) -> AdapterError {
    AdapterError::MalformedRequest {
        message: format!("missing required field `{field}`"),
    }
}
