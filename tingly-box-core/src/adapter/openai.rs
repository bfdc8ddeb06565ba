//! OpenAI chat-completions shape: parse/render against [`UnifiedRequest`] /
//! [`UnifiedResponse`] (§4.F).

use super::translate::{
    missing_field, openai_max_tokens_field, render_openai_tool_choice, ContentBlock, Role,
    ToolChoice, UnifiedMessage, UnifiedRequest, UnifiedResponse,
};
use crate::error::AdapterError;
use serde_json::{json, Value};

pub fn parse_request(body: &Value) -> Result<UnifiedRequest, AdapterError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field("model"))?
        .to_string();

    let messages_val = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| missing_field("messages"))?;

    let mut system = Vec::new();
    let mut messages = Vec::with_capacity(messages_val.len());

    for m in messages_val {
        let role_str = m.get("role").and_then(Value::as_str).unwrap_or("user");
        if role_str == "system" {
            if let Some(text) = m.get("content").and_then(Value::as_str) {
                system.push(text.to_string());
            }
            continue;
        }

        let role = match role_str {
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        };

        let mut content = parse_content(m.get("content").unwrap_or(&Value::Null));

        if let Some(tool_calls) = m.get("tool_calls").and_then(Value::as_array) {
            for call in tool_calls {
                let id = call.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                let function = call.get("function").cloned().unwrap_or(Value::Null);
                let name = function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let arguments = function
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Null);
                content.push(ContentBlock::ToolUse { id, name, arguments });
            }
        }

        if role_str == "tool" {
            let tool_call_id = m
                .get("tool_call_id")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let text = m.get("content").and_then(Value::as_str).unwrap_or("").to_string();
            content = vec![ContentBlock::ToolResult {
                tool_use_id: tool_call_id,
                content: text,
                is_error: false,
            }];
        }

        messages.push(UnifiedMessage { role, content });
    }

    let max_tokens = body
        .get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
        .and_then(Value::as_u64)
        .map(|v| v as u32);

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let tool_choice = body.get("tool_choice").and_then(parse_openai_tool_choice);

    Ok(UnifiedRequest {
        model,
        system,
        messages,
        max_tokens,
        temperature: body.get("temperature").and_then(Value::as_f64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        tools,
        tool_choice,
        thinking_enabled: false,
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_openai_tool_choice(v: &Value) -> Option<ToolChoice> {
    match v {
        Value::String(s) if s == "auto" => Some(ToolChoice::Auto),
        Value::String(s) if s == "required" => Some(ToolChoice::Required),
        Value::String(s) if s == "none" => Some(ToolChoice::Auto),
        Value::Object(_) => v
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(|n| ToolChoice::Named(n.to_string())),
        _ => None,
    }
}

fn parse_content(content: &Value) -> Vec<ContentBlock> {
    match content {
        Value::String(s) => vec![ContentBlock::Text(s.clone())],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| match p.get("type").and_then(Value::as_str) {
                Some("text") => Some(ContentBlock::Text(
                    p.get("text").and_then(Value::as_str)?.to_string(),
                )),
                Some("image_url") => Some(ContentBlock::Image {
                    media_type: "image/unknown".to_string(),
                    data: p
                        .get("image_url")
                        .and_then(|u| u.get("url"))
                        .and_then(Value::as_str)?
                        .to_string(),
                }),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

/// Render a [`UnifiedRequest`] as an OpenAI chat-completions body, targeting
/// `target_model` (the provider-side model name after any config mapping).
pub fn render_request(req: &UnifiedRequest, target_model: &str) -> Value {
    let mut messages = Vec::new();
    if !req.system.is_empty() {
        messages.push(json!({"role": "system", "content": req.system.join("\n")}));
    }
    for m in &req.messages {
        messages.extend(render_message(m));
    }

    let mut body = json!({
        "model": target_model,
        "messages": messages,
    });

    if let Some(max_tokens) = req.max_tokens {
        body[openai_max_tokens_field(target_model)] = json!(max_tokens);
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
        body["tool_choice"] = render_openai_tool_choice(choice);
    }
    if req.stream {
        body["stream"] = Value::Bool(true);
    }
    body
}

fn render_message(msg: &UnifiedMessage) -> Vec<Value> {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();
    let mut thinking_parts = Vec::new();

    for block in &msg.content {
        match block {
            ContentBlock::Text(t) => text_parts.push(t.clone()),
            ContentBlock::Thinking(t) => thinking_parts.push(t.clone()),
            ContentBlock::ToolUse { id, name, arguments } => {
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": serde_json::to_string(arguments).unwrap_or_default(),
                    }
                }));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => tool_results.push((tool_use_id.clone(), content.clone())),
            ContentBlock::Image { data, .. } => {
                text_parts.push(format!("[image: {data}]"));
            }
        }
    }

    if !tool_results.is_empty() {
        return tool_results
            .into_iter()
            .map(|(id, content)| json!({"role": "tool", "tool_call_id": id, "content": content}))
            .collect();
    }

    let mut out = json!({"role": role, "content": text_parts.join("\n")});
    if !tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(tool_calls);
    }
    if !thinking_parts.is_empty() {
        out["x_thinking"] = Value::String(thinking_parts.join("\n"));
    }
    vec![out]
}

pub fn parse_response(body: &Value) -> Result<UnifiedResponse, AdapterError> {
    let id = body.get("id").and_then(Value::as_str).unwrap_or("").to_string();
    let model = body.get("model").and_then(Value::as_str).unwrap_or("").to_string();

    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());

    let mut content = Vec::new();
    let mut stop_reason = None;
    if let Some(choice) = choice {
        stop_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(message) = choice.get("message") {
            if let Some(text) = message.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    content.push(ContentBlock::Text(text.to_string()));
                }
            }
            if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
                for call in tool_calls {
                    let function = call.get("function").cloned().unwrap_or(Value::Null);
                    let arguments = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or(Value::Null);
                    content.push(ContentBlock::ToolUse {
                        id: call.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
                        name: function
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        arguments,
                    });
                }
            }
        }
    }

    let usage = body.get("usage").map(|u| {
        (
            u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
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
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &resp.content {
        match block {
            ContentBlock::Text(t) => text.push_str(t),
            ContentBlock::ToolUse { id, name, arguments } => tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": serde_json::to_string(arguments).unwrap_or_default(),
                }
            })),
            _ => {}
        }
    }

    let mut message = json!({"role": "assistant", "content": text});
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }

    let mut body = json!({
        "id": resp.id,
        "object": "chat.completion",
        "model": resp.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": resp.stop_reason,
        }],
    });
    if let Some((prompt, completion)) = resp.usage {
        body["usage"] = json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        });
    }
    body
}
