//! Provider-specific transforms applied after generic shape translation
//! (§4.F): Gemini tool-schema rewrites and thinking config, Codex OAuth
//! parameter stripping, and DeepSeek's `reasoning_content` rename.

use serde_json::Value;

/// Recursively rewrite `exclusiveMinimum`/`exclusiveMaximum` into
/// `minimum`/`maximum` across `properties`, `items`, and `anyOf` branches —
/// Gemini's tool-schema dialect doesn't accept the exclusive-bound keywords.
pub fn gemini_schema_filter(schema: &mut Value) {
    let Value::Object(map) = schema else {
        return;
    };

    if let Some(v) = map.remove("exclusiveMinimum") {
        map.insert("minimum".to_string(), v);
    }
    if let Some(v) = map.remove("exclusiveMaximum") {
        map.insert("maximum".to_string(), v);
    }

    if let Some(properties) = map.get_mut("properties").and_then(Value::as_object_mut) {
        for (_, prop) in properties.iter_mut() {
            gemini_schema_filter(prop);
        }
    }
    if let Some(items) = map.get_mut("items") {
        gemini_schema_filter(items);
    }
    if let Some(variants) = map.get_mut("anyOf").and_then(Value::as_array_mut) {
        for variant in variants.iter_mut() {
            gemini_schema_filter(variant);
        }
    }
}

/// Apply [`gemini_schema_filter`] to every tool's `function.parameters` (or
/// bare `parameters`, for providers that pass through un-nested tool defs).
pub fn gemini_tools_filter(tools: &mut [Value]) {
    for tool in tools.iter_mut() {
        if let Some(params) = tool
            .get_mut("function")
            .and_then(|f| f.get_mut("parameters"))
        {
            gemini_schema_filter(params);
        } else if let Some(params) = tool.get_mut("parameters") {
            gemini_schema_filter(params);
        }
    }
}

/// Wrap thinking config as `extra_body.google.thinking_config` per the
/// Gemini generation-2-vs-3 field split.
pub fn gemini_thinking_config(body: &mut Value, model: &str, budget_tokens: Option<u32>, include_thoughts: bool) {
    let field = if model.contains("gemini-2") {
        "thinking_budget"
    } else {
        "thinking_level"
    };
    let mut config = serde_json::json!({ "include_thoughts": include_thoughts });
    if let Some(budget) = budget_tokens {
        config[field] = serde_json::json!(budget);
    }
    body["extra_body"]["google"]["thinking_config"] = config;
}

/// Codex's OAuth surface rejects sampling parameters outright.
pub fn codex_oauth_strip(body: &mut Value) {
    if let Value::Object(map) = body {
        for key in ["max_tokens", "max_completion_tokens", "temperature", "top_p"] {
            map.remove(key);
        }
    }
}

/// DeepSeek reports thinking as `reasoning_content` rather than the adapter's
/// private `x_thinking` field, on every assistant message.
pub fn deepseek_rename_thinking(body: &mut Value) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    for message in messages.iter_mut() {
        if message.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        if let Some(map) = message.as_object_mut() {
            if let Some(thinking) = map.remove("x_thinking") {
                map.insert("reasoning_content".to_string(), thinking);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gemini_filter_rewrites_nested_exclusive_bounds() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer", "exclusiveMinimum": 0},
                "items": {"type": "array", "items": {"exclusiveMaximum": 100}},
            }
        });
        gemini_schema_filter(&mut schema);
        assert_eq!(schema["properties"]["count"]["minimum"], 0);
        assert!(schema["properties"]["count"].get("exclusiveMinimum").is_none());
        assert_eq!(schema["properties"]["items"]["items"]["maximum"], 100);
    }

    #[test]
    fn gemini_thinking_config_field_depends_on_generation() {
        let mut body = json!({});
        gemini_thinking_config(&mut body, "gemini-2.5-pro", Some(8000), true);
        assert_eq!(body["extra_body"]["google"]["thinking_config"]["thinking_budget"], 8000);

        let mut body = json!({});
        gemini_thinking_config(&mut body, "gemini-3.0", Some(2), true);
        assert_eq!(body["extra_body"]["google"]["thinking_config"]["thinking_level"], 2);
    }

    #[test]
    fn codex_oauth_strips_sampling_params() {
        let mut body = json!({"model": "gpt-5-codex", "max_tokens": 16, "temperature": 0.7});
        codex_oauth_strip(&mut body);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
        assert_eq!(body["model"], "gpt-5-codex");
    }

    #[test]
    fn deepseek_renames_x_thinking_on_assistant_messages() {
        let mut body = json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello", "x_thinking": "thinking about it"},
            ]
        });
        deepseek_rename_thinking(&mut body);
        assert_eq!(body["messages"][1]["reasoning_content"], "thinking about it");
        assert!(body["messages"][1].get("x_thinking").is_none());
    }
}
