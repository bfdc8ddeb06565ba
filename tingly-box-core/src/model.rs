//! Core domain types shared across the dispatch core: [`Provider`], [`Scenario`],
//! [`ApiStyle`], authentication records, and the ephemeral [`RequestContext`]
//! extracted from each inbound request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The wire dialect an upstream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStyle {
    Openai,
    Anthropic,
    Google,
    Responses,
}

/// A caller-facing grouping that disambiguates same-named request-models
/// across wire shapes (e.g. "openai" vs "claude_code").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Openai,
    Anthropic,
    ClaudeCode,
    ClaudeCodeHaiku,
    ClaudeCodeOpus,
    ClaudeCodeSonnet,
    ClaudeCodeSubagent,
    ClaudeCodeUnified,
    Opencode,
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Scenario::Openai => "openai",
            Scenario::Anthropic => "anthropic",
            Scenario::ClaudeCode => "claude_code",
            Scenario::ClaudeCodeHaiku => "claude_code_haiku",
            Scenario::ClaudeCodeOpus => "claude_code_opus",
            Scenario::ClaudeCodeSonnet => "claude_code_sonnet",
            Scenario::ClaudeCodeSubagent => "claude_code_subagent",
            Scenario::ClaudeCodeUnified => "claude_code_unified",
            Scenario::Opencode => "opencode",
        };
        f.write_str(s)
    }
}

/// How a request is authenticated against an upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthRecord {
    BearerApiKey { api_key: String },
    XApiKeyHeader { api_key: String },
    OauthToken {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
        extra: HashMap<String, String>,
    },
}

/// Immutable-per-request descriptor of an upstream LLM endpoint.
///
/// Owned by the config layer; the dispatch core only ever holds read-only
/// snapshots, resolved lazily from [`Provider::id`] by the services that
/// reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub api_style: ApiStyle,
    pub auth: AuthRecord,
    pub proxy_url: Option<String>,
    pub timeout: Option<std::time::Duration>,
    pub tags: Vec<String>,
    pub cached_models: Vec<String>,
}

/// A flat, UUID-keyed read-only registry of providers, resolved lazily by
/// services. Built once at config load time; never mutated by the core.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Uuid, Provider>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Provider> {
        self.providers.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.values()
    }
}

/// Ephemeral, one-per-inbound-request view used by the rule resolver (4.C),
/// the smart-routing evaluator (4.D), and stats accounting. Never escapes
/// the task processing the request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub model: String,
    pub thinking_enabled: bool,
    pub system_messages: Vec<String>,
    pub user_messages: Vec<String>,
    pub latest_role: Option<String>,
    pub latest_content_type: Option<String>,
    pub tool_use_names: Vec<String>,
    pub estimated_tokens: u32,
}

impl RequestContext {
    /// Estimate ⌊total-prose-chars / 4⌋ over system + user messages, the
    /// convention used by `token.*` smart-routing predicates (§3).
    pub fn estimate_tokens(system: &[String], user: &[String]) -> u32 {
        let chars: usize = system.iter().chain(user.iter()).map(|s| s.len()).sum();
        (chars / 4) as u32
    }

    pub fn system_joined(&self) -> String {
        self.system_messages.join("\n")
    }
}
