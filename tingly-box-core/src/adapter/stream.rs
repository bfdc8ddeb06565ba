//! Streaming translation (§4.F): turn an upstream server-sent-event byte
//! stream into caller-shape SSE text, preserving chunk order and
//! aggregating tool-call argument fragments into one emission per call.

use crate::model::ApiStyle;
use serde_json::{json, Value};

/// One decoded unit of a translated stream, shape-agnostic.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    Done { stop_reason: Option<String> },
    Error(String),
}

/// Splits raw upstream bytes on `\n`, stripping the SSE `data: ` prefix —
/// the same buffering shape used for the unary-to-streaming Anthropic path
/// elsewhere in this codebase.
#[derive(Default)]
pub struct SseLineReader {
    buffer: String,
}

impl SseLineReader {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer = self.buffer[pos + 1..].to_string();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim().to_string();
                if !data.is_empty() {
                    lines.push(data);
                }
            }
        }
        lines
    }
}

/// Tool-call argument fragments arrive incrementally; OpenAI/Responses
/// output needs one atomic call, so fragments are buffered here keyed by
/// the upstream's per-call index until a completion signal closes them out.
#[derive(Default)]
struct ToolCallAggregator {
    calls: Vec<(String, String, String)>, // (id, name, argument fragments concatenated)
}

impl ToolCallAggregator {
    fn upsert(&mut self, index: usize, id: Option<&str>, name: Option<&str>, args_fragment: Option<&str>) {
        while self.calls.len() <= index {
            self.calls.push((String::new(), String::new(), String::new()));
        }
        let entry = &mut self.calls[index];
        if let Some(id) = id {
            entry.0 = id.to_string();
        }
        if let Some(name) = name {
            entry.1 = name.to_string();
        }
        if let Some(fragment) = args_fragment {
            entry.2.push_str(fragment);
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .filter(|(id, _, _)| !id.is_empty())
            .map(|(id, name, args)| StreamEvent::ToolCall {
                id,
                name,
                arguments: serde_json::from_str(&args).unwrap_or(Value::Null),
            })
            .collect()
    }
}

/// Consumes upstream SSE data lines for `from_style` and yields
/// shape-agnostic [`StreamEvent`]s in upstream order.
#[derive(Default)]
pub struct StreamTranslator {
    reader: SseLineReader,
    tool_calls: ToolCallAggregator,
}

impl StreamTranslator {
    pub fn feed(&mut self, chunk: &[u8], from_style: ApiStyle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for data in self.reader.feed(chunk) {
            events.extend(self.parse_one(&data, from_style));
        }
        events
    }

    fn parse_one(&mut self, data: &str, from_style: ApiStyle) -> Vec<StreamEvent> {
        if data == "[DONE]" {
            let mut events = self.tool_calls.finish();
            events.push(StreamEvent::Done { stop_reason: None });
            return events;
        }
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            return vec![];
        };

        match from_style {
            ApiStyle::Openai | ApiStyle::Responses => self.parse_openai_like(&value),
            ApiStyle::Anthropic => self.parse_anthropic(&value),
            ApiStyle::Google => self.parse_openai_like(&value),
        }
    }

    fn parse_openai_like(&mut self, value: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let Some(choice) = value.get("choices").and_then(Value::as_array).and_then(|c| c.first())
        else {
            return events;
        };
        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    events.push(StreamEvent::TextDelta(text.to_string()));
                }
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in tool_calls {
                    let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                    let id = call.get("id").and_then(Value::as_str);
                    let function = call.get("function");
                    let name = function.and_then(|f| f.get("name")).and_then(Value::as_str);
                    let args = function.and_then(|f| f.get("arguments")).and_then(Value::as_str);
                    self.tool_calls.upsert(index, id, name, args);
                }
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            events.extend(self.tool_calls.finish());
            events.push(StreamEvent::Done {
                stop_reason: Some(reason.to_string()),
            });
        }
        events
    }

    fn parse_anthropic(&mut self, value: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match value.get("type").and_then(Value::as_str) {
            Some("content_block_start") => {
                if let Some(block) = value.get("content_block") {
                    if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                        let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                        self.tool_calls.upsert(
                            index,
                            block.get("id").and_then(Value::as_str),
                            block.get("name").and_then(Value::as_str),
                            None,
                        );
                    }
                }
            }
            Some("content_block_delta") => {
                let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                if let Some(delta) = value.get("delta") {
                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                        events.push(StreamEvent::TextDelta(text.to_string()));
                    }
                    if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                        self.tool_calls.upsert(index, None, None, Some(partial));
                    }
                }
            }
            Some("message_delta") => {
                if let Some(reason) = value
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    events.push(StreamEvent::Done {
                        stop_reason: Some(reason.to_string()),
                    });
                }
            }
            Some("message_stop") => {
                events.extend(self.tool_calls.finish());
                events.push(StreamEvent::Done { stop_reason: None });
            }
            Some("error") => {
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("upstream stream error")
                    .to_string();
                events.push(StreamEvent::Error(message));
            }
            _ => {}
        }
        events
    }
}

/// Render one [`StreamEvent`] as an SSE frame (`"data: ...\n\n"`, or the
/// `[DONE]` sentinel) in the caller's shape. Returns `None` for events that
/// don't produce caller-visible output in this shape (e.g. Anthropic's
/// `message_stop`, handled by [`terminal_frame`] instead).
pub fn render_event(event: &StreamEvent, to_style: ApiStyle, model: &str, id: &str) -> Option<String> {
    match to_style {
        ApiStyle::Openai | ApiStyle::Responses => render_openai_like(event, model, id),
        ApiStyle::Anthropic => render_anthropic(event, id),
        ApiStyle::Google => render_openai_like(event, model, id),
    }
}

fn render_openai_like(event: &StreamEvent, model: &str, id: &str) -> Option<String> {
    let body = match event {
        StreamEvent::TextDelta(text) => json!({
            "id": id,
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}],
        }),
        StreamEvent::ToolCall { id: call_id, name, arguments } => json!({
            "id": id,
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{
                "index": 0,
                "delta": {"tool_calls": [{
                    "index": 0,
                    "id": call_id,
                    "type": "function",
                    "function": {"name": name, "arguments": serde_json::to_string(arguments).unwrap_or_default()},
                }]},
                "finish_reason": null,
            }],
        }),
        StreamEvent::Done { stop_reason } => json!({
            "id": id,
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": {}, "finish_reason": stop_reason}],
        }),
        StreamEvent::Error(message) => json!({"error": {"message": message}}),
    };
    Some(format!("data: {body}\n\n"))
}

fn render_anthropic(event: &StreamEvent, _id: &str) -> Option<String> {
    let (event_name, body) = match event {
        StreamEvent::TextDelta(text) => (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}),
        ),
        StreamEvent::ToolCall { id: call_id, name, arguments } => (
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "tool_use", "id": call_id, "name": name, "input": arguments},
            }),
        ),
        StreamEvent::Done { stop_reason } => (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": stop_reason}}),
        ),
        StreamEvent::Error(message) => (
            "error",
            json!({"type": "error", "error": {"type": "api_error", "message": message}}),
        ),
    };
    Some(format!("event: {event_name}\ndata: {body}\n\n"))
}

/// The sentinel that ends a stream in the caller's shape (§4.F).
pub fn terminal_frame(to_style: ApiStyle) -> &'static str {
    match to_style {
        ApiStyle::Openai | ApiStyle::Responses | ApiStyle::Google => "data: [DONE]\n\n",
        ApiStyle::Anthropic => "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_reader_strips_data_prefix_and_buffers_partial_lines() {
        let mut reader = SseLineReader::default();
        let lines = reader.feed(b"data: {\"a\":1}\ndata: {\"b");
        assert_eq!(lines, vec!["{\"a\":1}".to_string()]);
        let lines = reader.feed(b"\":2}\n");
        assert_eq!(lines, vec!["{\"b\":2}".to_string()]);
    }

    #[test]
    fn openai_text_delta_chunk_yields_text_delta_event() {
        let mut t = StreamTranslator::default();
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n";
        let events = t.feed(chunk, ApiStyle::Openai);
        assert!(matches!(events.as_slice(), [StreamEvent::TextDelta(t)] if t == "hi"));
    }

    #[test]
    fn openai_tool_call_fragments_aggregate_until_finish_reason() {
        let mut t = StreamTranslator::default();
        let c1 = b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"{\\\"ci\"}}]},\"finish_reason\":null}]}\n";
        let c2 = b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"ty\\\":\\\"nyc\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n";
        assert!(t.feed(c1, ApiStyle::Openai).is_empty());
        let events = t.feed(c2, ApiStyle::Openai);
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolCall { name, .. } if name == "get_weather")));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
    }

    #[test]
    fn done_sentinel_stops_translation() {
        let mut t = StreamTranslator::default();
        let events = t.feed(b"data: [DONE]\n", ApiStyle::Openai);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[test]
    fn anthropic_message_stop_closes_the_stream() {
        let mut t = StreamTranslator::default();
        let events = t.feed(b"data: {\"type\":\"message_stop\"}\n", ApiStyle::Anthropic);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[test]
    fn terminal_frame_matches_caller_shape() {
        assert_eq!(terminal_frame(ApiStyle::Openai), "data: [DONE]\n\n");
        assert!(terminal_frame(ApiStyle::Anthropic).contains("message_stop"));
    }
}
