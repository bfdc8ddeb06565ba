//! Anthropic messages shape: parse/render against [`UnifiedRequest`] /
//! [`UnifiedResponse`] (§4.F).

use super::translate::{
    missing_field, parse_anthropic_tool_choice, render_anthropic_tool_choice, ContentBlock, Role,
    UnifiedMessage, UnifiedRequest, UnifiedResponse,
};
use crate::error::AdapterError;
use serde_json::{json, Value};

pub fn parse_request(body: &Value) -> Result<UnifiedRequest, AdapterError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("model"))?
        .to_string();

    let mut system = Vec::new();
    match body.get("system") {
        Some(Value::String(s)) => system.push(s.clone()),
        Some(Value::Array(blocks)) => {
            for b in blocks {
                if let Some(text) = b.get("text").and_then(Value::as_str) {
                    system.push(text.to_string());
                }
            }
        }
        _ => {}
    }

    let messages_val = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| missing_field("messages"))?;

    let mut thinking_enabled = false;
    if body
        .get("thinking")
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        == Some("enabled")
    {
        thinking_enabled = true;
    }

    let mut messages = Vec::with_capacity(messages_val.len());
    for m in messages_val {
        let role = match m.get("role").and_then(Value::as_str) {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => Role::User,
        };
        let content = parse_content(m.get("content").unwrap_or(&Value::Null));
        messages.push(UnifiedMessage { role, content });
    }

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let tool_choice = body.get("tool_choice").and_then(parse_anthropic_tool_choice);

    Ok(UnifiedRequest {
        model,
        system,
        messages,
        max_tokens: body.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
        temperature: body.get("temperature").and_then(Value::as_f64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        tools,
        tool_choice,
        thinking_enabled,
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_content(content: &Value) -> Vec<ContentBlock> {
    match content {
        Value::String(s) => vec![ContentBlock::Text(s.clone())],
        Value::Array(blocks) => blocks.iter().filter_map(parse_block).collect(),
        _ => vec![],
    }
}

fn parse_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text(
            block.get("text").and_then(Value::as_str)?.to_string(),
        )),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: block.get("id").and_then(Value::as_str)?.to_string(),
            name: block.get("name").and_then(Value::as_str)?.to_string(),
            arguments: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => {
            let content = match block.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Some(ContentBlock::ToolResult {
                tool_use_id: block.get("tool_use_id").and_then(Value::as_str)?.to_string(),
                content,
                is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            })
        }
        "thinking" => Some(ContentBlock::Thinking(
            block.get("thinking").and_then(Value::as_str).unwrap_or("").to_string(),
        )),
        "image" => {
            let source = block.get("source")?;
            Some(ContentBlock::Image {
                media_type: source
                    .get("media_type")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                data: source.get("data").and_then(Value::as_str)?.to_string(),
            })
        }
        _ => None,
    }
}

/// Render a [`UnifiedRequest`] as an Anthropic `/v1/messages` body, targeting
/// `target_model` (the provider-side model name after any config mapping).
pub fn render_request(req: &UnifiedRequest, target_model: &str) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| !matches!(m.role, Role::Tool))
        .map(render_message)
        .collect();

    let mut body = json!({
        "model": target_model,
        "max_tokens": req.max_tokens.unwrap_or(4096),
        "messages": messages,
    });

    if !req.system.is_empty() {
        body["system"] = Value::String(req.system.join("\n"));
    }
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        body["top_p"] = json!(p);
    }
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(req.tools.clone());
    }
    if let Some(choice) = &req.tool_choice {
        body["tool_choice"] = render_anthropic_tool_choice(choice);
    }
    if req.thinking_enabled {
        body["thinking"] = json!({"type": "enabled"});
    }
    if req.stream {
        body["stream"] = Value::Bool(true);
    }
    body
}

fn render_message(msg: &UnifiedMessage) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "user",
    };
    let content: Vec<Value> = msg.content.iter().map(render_block).collect();
    json!({ "role": role, "content": content })
}

fn render_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text(text) => json!({"type": "text", "text": text}),
        ContentBlock::ToolUse { id, name, arguments } => {
            json!({"type": "tool_use", "id": id, "name": name, "input": arguments})
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            })
        }
        ContentBlock::Thinking(text) => json!({"type": "thinking", "thinking": text}),
        ContentBlock::Image { media_type, data } => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
    }
}

pub fn parse_response(body: &Value) -> Result<UnifiedResponse, AdapterError> {
    let id = body.get("id").and_then(Value::as_str).unwrap_or("").to_string();
    let model = body.get("model").and_then(Value::as_str).unwrap_or("").to_string();
    let content = body
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().filter_map(parse_block).collect())
        .unwrap_or_default();
    let stop_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    let usage = body.get("usage").map(|u| {
        (
            u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        )
    });
    Ok(UnifiedResponse {
        id,
        model,
        content,
        stop_reason,
        usage,
    })
}

pub fn render_response(resp: &UnifiedResponse) -> Value {
    let content: Vec<Value> = resp.content.iter().map(render_block).collect();
    let mut body = json!({
        "id": resp.id,
        "type": "message",
        "role": "assistant",
        "model": resp.model,
        "content": content,
        "stop_reason": resp.stop_reason,
    });
    if let Some((input, output)) = resp.usage {
        body["usage"] = json!({"input_tokens": input, "output_tokens": output});
    }
    body
}
