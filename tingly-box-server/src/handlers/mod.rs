//! HTTP handlers (§6): the external surface over the dispatch core. Each
//! wire-shape endpoint authenticates the caller, dispatches through
//! [`tingly_box_core::DispatchOrchestrator`], and renders either a JSON body
//! or a translated SSE stream in the caller's own shape. `GET /health`,
//! `GET /metrics`, and `GET /metrics/prometheus` are ambient and never touch
//! the dispatch core's request path.

use crate::auth;
use crate::gateway_error::ShapedError;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tingly_box_core::adapter::stream::{render_event, terminal_frame, StreamTranslator};
use tingly_box_core::{ApiStyle, Scenario};

fn request_model(body: &Value) -> String {
    body.get("model").and_then(Value::as_str).unwrap_or_default().to_string()
}

fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

async fn dispatch_unary_response(
    state: &AppState,
    shape: ApiStyle,
    scenario: Scenario,
    body: &Value,
) -> Result<Json<Value>, ShapedError> {
    let model = request_model(body);
    let rendered = state
        .orchestrator
        .dispatch_unary(shape, scenario, &model, body)
        .await
        .map_err(|e| ShapedError::new(shape, e))?;
    Ok(Json(rendered))
}

/// Drain a dispatched stream into an SSE response in the caller's shape.
/// Latency is recorded off the first translated event (time-to-first-byte);
/// usage and token speed are recorded once the upstream closes the
/// connection (§4.H step 4.c; best-effort on cancellation per §4.H's
/// cancellation note).
async fn dispatch_stream_response(
    state: &AppState,
    shape: ApiStyle,
    scenario: Scenario,
    body: &Value,
) -> Result<Response, ShapedError> {
    let model = request_model(body);
    let id = uuid::Uuid::new_v4().to_string();
    let model_for_frames = model.clone();
    let handle = state
        .orchestrator
        .dispatch_stream(shape, scenario, &model, body)
        .await
        .map_err(|e| ShapedError::new(shape, e))?;

    let from_style = handle.provider_api_style;
    let body_stream = async_stream::stream! {
        let mut translator = StreamTranslator::default();
        let mut upstream = handle.response.bytes_stream();
        let mut output_chars: u64 = 0;
        let mut done = false;
        let mut first_byte_seen = false;

        while let Some(chunk) = upstream.next().await {
            let Ok(chunk) = chunk else { break };
            for event in translator.feed(&chunk, from_style) {
                if !first_byte_seen {
                    first_byte_seen = true;
                    handle.record_first_byte().await;
                }
                if let tingly_box_core::adapter::stream::StreamEvent::TextDelta(text) = &event {
                    output_chars += text.chars().count() as u64;
                }
                let is_done = matches!(event, tingly_box_core::adapter::stream::StreamEvent::Done { .. });
                if let Some(frame) = render_event(&event, shape, &model_for_frames, &id) {
                    yield Ok::<_, std::io::Error>(axum::body::Bytes::from(frame));
                }
                if is_done {
                    done = true;
                }
            }
        }

        if done {
            yield Ok(axum::body::Bytes::from(terminal_frame(shape)));
            handle.record_completion(output_chars / 4).await;
            handle.report_success().await;
        } else {
            handle.report_cancelled().await;
        }
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap())
}

/// `POST /tingly/openai/v1/chat/completions`
pub async fn openai_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ShapedError> {
    auth::validate_caller_key(&headers).map_err(|e| ShapedError::new(ApiStyle::Openai, e))?;
    if wants_stream(&body) {
        dispatch_stream_response(&state, ApiStyle::Openai, Scenario::Openai, &body).await
    } else {
        Ok(dispatch_unary_response(&state, ApiStyle::Openai, Scenario::Openai, &body)
            .await?
            .into_response())
    }
}

/// `POST /tingly/anthropic/v1/messages`
pub async fn anthropic_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ShapedError> {
    auth::validate_caller_key(&headers).map_err(|e| ShapedError::new(ApiStyle::Anthropic, e))?;
    if wants_stream(&body) {
        dispatch_stream_response(&state, ApiStyle::Anthropic, Scenario::Anthropic, &body).await
    } else {
        Ok(
            dispatch_unary_response(&state, ApiStyle::Anthropic, Scenario::Anthropic, &body)
                .await?
                .into_response(),
        )
    }
}

/// `POST /tingly/responses/v1/responses`. Routed under the `openai`
/// scenario: §3's scenario tag set has no dedicated `responses` entry, and
/// the Responses shape is the ChatGPT backend's OpenAI-family dialect.
pub async fn responses_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ShapedError> {
    auth::validate_caller_key(&headers).map_err(|e| ShapedError::new(ApiStyle::Responses, e))?;
    if wants_stream(&body) {
        dispatch_stream_response(&state, ApiStyle::Responses, Scenario::Openai, &body).await
    } else {
        Ok(
            dispatch_unary_response(&state, ApiStyle::Responses, Scenario::Openai, &body)
                .await?
                .into_response(),
        )
    }
}

/// `GET /v1/models`: advertised response-model names from every active rule.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let models: Vec<Value> = state
        .config
        .rules
        .iter()
        .filter(|r| r.active)
        .map(|r| {
            json!({
                "id": r.response_model,
                "object": "model",
                "scenario": r.scenario.to_string(),
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": models }))
}

/// `GET /health`: process liveness, not a dispatch-core health check.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /metrics`: aggregate dispatch-core counters in JSON (§6, §10.1).
pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(crate::metrics::aggregate(&state.service_registry, &state.health).await)
}

/// `GET /metrics/prometheus`: the text-exposition variant.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = crate::metrics::prometheus(&state.service_registry, &state.health).await;
    ([("content-type", "text/plain; version=0.0.4")], body)
}
