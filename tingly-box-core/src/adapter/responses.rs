//! Responses/ChatGPT-backend shape: parse/render against [`UnifiedRequest`] /
//! [`UnifiedResponse`] (§4.F).

use super::translate::{
    missing_field, render_openai_tool_choice, ContentBlock, Role, UnifiedMessage, UnifiedRequest,
    UnifiedResponse,
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
    if let Some(instructions) = body.get("instructions").and_then(Value::as_str) {
        system.push(instructions.to_string());
    }

    let input = body
        .get("input")
        .and_then(Value::as_array)
        .ok_or_else(|| missing_field("input"))?;

    let mut messages = Vec::with_capacity(input.len());
    for item in input {
        match item.get("type").and_then(Value::as_str) {
            Some("function_call") => {
                messages.push(UnifiedMessage {
                    role: Role::Assistant,
                    content: vec![ContentBlock::ToolUse {
                        id: item.get("call_id").and_then(Value::as_str).unwrap_or("").to_string(),
                        name: item.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                        arguments: item
                            .get("arguments")
                            .and_then(Value::as_str)
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or(Value::Null),
                    }],
                });
            }
            Some("function_call_output") => {
                messages.push(UnifiedMessage {
                    role: Role::Tool,
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        content: item
                            .get("output")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        is_error: false,
                    }],
                });
            }
            _ => {
                let role = match item.get("role").and_then(Value::as_str) {
                    Some("assistant") => Role::Assistant,
                    Some("system") | Some("developer") => {
                        if let Some(text) = item.get("content").and_then(content_text) {
                            system.push(text);
                        }
                        continue;
                    }
                    _ => Role::User,
                };
                let content = item
                    .get("content")
                    .map(parse_content)
                    .unwrap_or_default();
                messages.push(UnifiedMessage { role, content });
            }
        }
    }

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Ok(UnifiedRequest {
        model,
        system,
        messages,
        max_tokens: body
            .get("max_output_tokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        temperature: body.get("temperature").and_then(Value::as_f64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        tools,
        tool_choice: None,
        thinking_enabled: false,
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn content_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

fn parse_content(content: &Value) -> Vec<ContentBlock> {
    match content {
        Value::String(s) => vec![ContentBlock::Text(s.clone())],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| match p.get("type").and_then(Value::as_str) {
                Some("input_text") | Some("output_text") | Some("text") => Some(
                    ContentBlock::Text(p.get("text").and_then(Value::as_str)?.to_string()),
                ),
                Some("input_image") => Some(ContentBlock::Image {
                    media_type: "image/unknown".to_string(),
                    data: p.get("image_url").and_then(Value::as_str)?.to_string(),
                }),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}

/// Render a [`UnifiedRequest`] as a Responses API body, targeting
/// `target_model` (the provider-side model name after any config mapping).
pub fn render_request(req: &UnifiedRequest, target_model: &str) -> Value {
    let mut input = Vec::new();
    for m in &req.messages {
        input.extend(render_item(m));
    }

    let mut body = json!({
        "model": target_model,
        "input": input,
    });

    if !req.system.is_empty() {
        body["instructions"] = Value::String(req.system.join("\n"));
    }
    if let Some(max_tokens) = req.max_tokens {
        body["max_output_tokens"] = json!(max_tokens);
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

fn render_item(msg: &UnifiedMessage) -> Vec<Value> {
    let mut items = Vec::new();
    let mut text_parts = Vec::new();
    let mut thinking_parts = Vec::new();

    for block in &msg.content {
        match block {
            ContentBlock::Text(t) => text_parts.push(t.clone()),
            ContentBlock::Thinking(t) => thinking_parts.push(t.clone()),
            ContentBlock::ToolUse { id, name, arguments } => {
                items.push(json!({
                    "type": "function_call",
                    "call_id": id,
                    "name": name,
                    "arguments": serde_json::to_string(arguments).unwrap_or_default(),
                }));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                items.push(json!({
                    "type": "function_call_output",
                    "call_id": tool_use_id,
                    "output": content,
                    "status": "completed",
                }));
            }
            ContentBlock::Image { data, .. } => text_parts.push(format!("[image: {data}]")),
        }
    }

    if !text_parts.is_empty() {
        let role = match msg.role {
            Role::Assistant => "assistant",
            _ => "user",
        };
        let mut item = json!({"role": role, "content": [{"type": "input_text", "text": text_parts.join("\n")}]});
        if !thinking_parts.is_empty() {
            item["x_thinking"] = Value::String(thinking_parts.join("\n"));
        }
        items.insert(0, item);
    }
    items
}

pub fn parse_response(body: &Value) -> Result<UnifiedResponse, AdapterError> {
    let id = body.get("id").and_then(Value::as_str).unwrap_or("").to_string();
    let model = body.get("model").and_then(Value::as_str).unwrap_or("").to_string();

    let mut content = Vec::new();
    if let Some(output) = body.get("output").and_then(Value::as_array) {
        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    if let Some(parts) = item.get("content").and_then(Value::as_array) {
                        for part in parts {
                            if let Some(text) = part.get("text").and_then(Value::as_str) {
                                content.push(ContentBlock::Text(text.to_string()));
                            }
                        }
                    }
                }
                Some("function_call") => content.push(ContentBlock::ToolUse {
                    id: item.get("call_id").and_then(Value::as_str).unwrap_or("").to_string(),
                    name: item.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                    arguments: item
                        .get("arguments")
                        .and_then(Value::as_str)
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or(Value::Null),
                }),
                _ => {}
            }
        }
    }

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
        stop_reason: body
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string),
        usage,
    })
}

pub fn render_response(resp: &UnifiedResponse) -> Value {
    let mut output = Vec::new();
    let mut text_parts = Vec::new();
    for block in &resp.content {
        match block {
            ContentBlock::Text(t) => text_parts.push(t.clone()),
            ContentBlock::ToolUse { id, name, arguments } => output.push(json!({
                "type": "function_call",
                "call_id": id,
                "name": name,
                "arguments": serde_json::to_string(arguments).unwrap_or_default(),
            })),
            _ => {}
        }
    }
    if !text_parts.is_empty() {
        output.insert(
            0,
            json!({
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": text_parts.join("\n")}],
            }),
        );
    }

    let mut body = json!({
        "id": resp.id,
        "object": "response",
        "model": resp.model,
        "status": resp.stop_reason.clone().unwrap_or_else(|| "completed".to_string()),
        "output": output,
    });
    if let Some((input, out)) = resp.usage {
        body["usage"] = json!({"input_tokens": input, "output_tokens": out});
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_become_system_messages() {
        let body = json!({
            "model": "gpt-4o",
            "instructions": "be terse",
            "input": [{"role": "user", "content": "hi"}],
        });
        let req = parse_request(&body).unwrap();
        assert_eq!(req.system, vec!["be terse".to_string()]);
    }

    #[test]
    fn function_call_output_becomes_tool_result() {
        let body = json!({
            "model": "gpt-4o",
            "input": [
                {"type": "function_call_output", "call_id": "c1", "output": "sunny"}
            ],
        });
        let req = parse_request(&body).unwrap();
        assert!(matches!(req.messages[0].content[0], ContentBlock::ToolResult { .. }));
    }

    #[test]
    fn thinking_block_is_carried_through_as_x_thinking() {
        let msg = UnifiedMessage {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Thinking("mulling it over".to_string()),
                ContentBlock::Text("here's the answer".to_string()),
            ],
        };
        let items = render_item(&msg);
        assert_eq!(items[0]["x_thinking"], "mulling it over");
    }
}
