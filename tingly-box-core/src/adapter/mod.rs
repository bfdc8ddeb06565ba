//! Protocol adapter (§4.F): translates between the three caller-facing wire
//! shapes and three provider wire shapes via a single intermediate
//! representation ([`translate::UnifiedRequest`]/[`translate::UnifiedResponse`]),
//! plus provider-specific post-processing and streaming translation.
//!
//! Api-style handling is a closed variant plus a dispatch table (not
//! per-shape inheritance): [`parse_request`]/[`render_request`] below are
//! the table, keyed on [`ApiStyle`].

pub mod anthropic;
pub mod openai;
pub mod provider_transforms;
pub mod responses;
pub mod stream;
pub mod translate;

pub use translate::{ContentBlock, Role, ToolChoice, UnifiedMessage, UnifiedRequest, UnifiedResponse};

use crate::error::AdapterError;
use crate::model::ApiStyle;
use serde_json::Value;

/// Parse an inbound caller body of the given shape into the intermediate
/// representation.
pub fn parse_request(shape: ApiStyle, body: &Value) -> Result<UnifiedRequest, AdapterError> {
    match shape {
        ApiStyle::Openai => openai::parse_request(body),
        ApiStyle::Anthropic => anthropic::parse_request(body),
        ApiStyle::Responses => responses::parse_request(body),
        ApiStyle::Google => openai::parse_request(body),
    }
}

/// Render the intermediate representation as an outbound body in
/// `shape`, targeting `target_model` on the provider side.
pub fn render_request(shape: ApiStyle, req: &UnifiedRequest, target_model: &str) -> Value {
    match shape {
        ApiStyle::Openai => openai::render_request(req, target_model),
        ApiStyle::Anthropic => anthropic::render_request(req, target_model),
        ApiStyle::Responses => responses::render_request(req, target_model),
        ApiStyle::Google => openai::render_request(req, target_model),
    }
}

/// Parse an upstream response body of the given shape into the intermediate
/// representation.
pub fn parse_response(shape: ApiStyle, body: &Value) -> Result<UnifiedResponse, AdapterError> {
    match shape {
        ApiStyle::Openai => openai::parse_response(body),
        ApiStyle::Anthropic => anthropic::parse_response(body),
        ApiStyle::Responses => responses::parse_response(body),
        ApiStyle::Google => openai::parse_response(body),
    }
}

/// Render the intermediate representation as an outbound body in the
/// caller's shape.
pub fn render_response(shape: ApiStyle, resp: &UnifiedResponse) -> Value {
    match shape {
        ApiStyle::Openai => openai::render_response(resp),
        ApiStyle::Anthropic => anthropic::render_response(resp),
        ApiStyle::Responses => responses::render_response(resp),
        ApiStyle::Google => openai::render_response(resp),
    }
}
