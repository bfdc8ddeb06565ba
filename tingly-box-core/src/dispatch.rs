//! Dispatch orchestrator (§4.H): the only component that walks the full
//! request lifecycle — rule resolution, service selection, protocol
//! translation, upstream dispatch, and the retry/failover loop. Caller
//! authentication happens one layer up, in the server's auth module; by
//! the time a body reaches here it is already an authenticated request.

use crate::adapter::{self, UnifiedRequest};
use crate::adapter::provider_transforms;
use crate::balancer::{LoadBalancer, ServiceEntry};
use crate::error::{DispatchError, ErrorKind};
use crate::health::HealthMonitor;
use crate::model::{ApiStyle, Provider, ProviderRegistry, Scenario};
use crate::rules::{Rule, RuleResolver};
use crate::transport::{self, Operation, Transport};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_LATENCY_SAMPLES: usize = 200;
const DEFAULT_TPS_SAMPLES: usize = 200;

fn operation_for(api_style: ApiStyle) -> Operation {
    match api_style {
        ApiStyle::Anthropic => Operation::Messages,
        ApiStyle::Responses => Operation::Responses,
        ApiStyle::Openai | ApiStyle::Google => Operation::Chat,
    }
}

/// Apply the provider-specific transforms named in §4.F, gated on provider
/// tags set by the config layer (`gemini`, `codex-oauth`, `deepseek`).
fn apply_provider_transforms(body: &mut Value, provider: &Provider, req: &UnifiedRequest, target_model: &str) {
    if provider.tags.iter().any(|t| t == "gemini") {
        if let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) {
            provider_transforms::gemini_tools_filter(tools);
        }
        if req.thinking_enabled {
            provider_transforms::gemini_thinking_config(body, target_model, None, true);
        }
    }
    if provider.tags.iter().any(|t| t == "codex-oauth") {
        provider_transforms::codex_oauth_strip(body);
    }
    if provider.tags.iter().any(|t| t == "deepseek") {
        provider_transforms::deepseek_rename_thinking(body);
    }
}

pub struct DispatchOrchestrator {
    providers: Arc<ProviderRegistry>,
    rules: Vec<Rule>,
    balancer: Arc<LoadBalancer>,
    health: Arc<HealthMonitor>,
    transport: Arc<Transport>,
    max_attempts: u32,
}

impl DispatchOrchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        rules: Vec<Rule>,
        balancer: Arc<LoadBalancer>,
        health: Arc<HealthMonitor>,
        transport: Arc<Transport>,
    ) -> Self {
        Self {
            providers,
            rules,
            balancer,
            health,
            transport,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Dispatch one non-streaming request: parse, resolve, select/adapt/send
    /// with retry, translate the response back into the caller's shape.
    pub async fn dispatch_unary(
        &self,
        caller_shape: ApiStyle,
        scenario: Scenario,
        request_model: &str,
        body: &Value,
    ) -> Result<Value, DispatchError> {
        let unified = adapter::parse_request(caller_shape, body)?;
        let ctx = unified.to_request_context();

        let resolver = RuleResolver::new(&self.rules);
        let resolved = resolver.resolve(&scenario, request_model, &ctx)?;
        let tactic = resolved.rule.tactic.clone();
        let candidates = resolved.services.to_vec();

        let mut excluded: HashSet<String> = HashSet::new();
        let mut last_failure: Option<DispatchError> = None;

        for attempt in 0..self.max_attempts {
            let remaining: Vec<_> = candidates
                .iter()
                .filter(|c| !excluded.contains(&format!("{}:{}", c.provider_id, c.model)))
                .cloned()
                .collect();
            if remaining.is_empty() {
                break;
            }

            let entry = match self.balancer.select(&self.providers, &remaining, &tactic).await {
                Ok(entry) => entry,
                Err(e) => return Err(e.into()),
            };
            let service_id = entry.service.id();

            let Some(provider) = self.providers.get(entry.service.provider_id) else {
                excluded.insert(service_id);
                continue;
            };

            debug!(attempt, service_id = %service_id, scenario = %scenario, "dispatching attempt");

            match self
                .try_once(provider, &entry, &unified, caller_shape)
                .await
            {
                Ok(rendered) => return Ok(rendered),
                Err(error) => {
                    let retry = error.kind.retry_eligible() && attempt + 1 < self.max_attempts;
                    warn!(service_id = %service_id, kind = %error.kind, retry, "dispatch attempt failed");
                    excluded.insert(service_id);
                    last_failure = Some(error);
                    if !retry {
                        break;
                    }
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| DispatchError::internal("retry loop exhausted with no attempts made")))
    }

    async fn try_once(
        &self,
        provider: &Provider,
        entry: &Arc<ServiceEntry>,
        unified: &UnifiedRequest,
        caller_shape: ApiStyle,
    ) -> Result<Value, DispatchError> {
        let service_id = entry.service.id();
        let mut body = adapter::render_request(provider.api_style, unified, &entry.service.model);
        apply_provider_transforms(&mut body, provider, unified, &entry.service.model);

        let op = operation_for(provider.api_style);
        let started = Instant::now();

        let response = match self.transport.send(provider, op, body, false).await {
            Ok(r) => r,
            Err(e) => {
                self.health.report_error(&service_id, e.to_string()).await;
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let transport_err = transport::error_from_response(response).await;
            self.classify_and_report(&service_id, status.as_u16()).await;
            return Err(transport_err.into());
        }

        let upstream_body: Value = response.json().await.map_err(|e| {
            DispatchError::new(ErrorKind::BadUpstream, format!("upstream body not json: {e}"))
        })?;

        let unified_response = adapter::parse_response(provider.api_style, &upstream_body)?;
        let rendered = adapter::render_response(caller_shape, &unified_response);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        entry.stats.record_latency(elapsed_ms, DEFAULT_LATENCY_SAMPLES).await;
        if let Some((input, output)) = unified_response.usage {
            entry.stats.record_usage(input as u64, output as u64).await;
            if elapsed_ms > 0.0 {
                let tps = output as f64 / (elapsed_ms / 1000.0);
                entry.stats.record_token_speed(tps, DEFAULT_TPS_SAMPLES).await;
            }
        } else {
            entry.stats.record_usage(0, 0).await;
        }
        self.health.report_success(&service_id).await;

        Ok(rendered)
    }

    /// Dispatch one streaming request through the same resolve → select →
    /// adapt → send lifecycle as [`Self::dispatch_unary`]. Retries only
    /// apply before the first byte (a transport fault or a non-2xx
    /// status); once a stream has started the caller owns draining and
    /// translating it via [`crate::adapter::stream`] and reports
    /// completion back through the returned [`StreamHandle`].
    pub async fn dispatch_stream(
        &self,
        caller_shape: ApiStyle,
        scenario: Scenario,
        request_model: &str,
        body: &Value,
    ) -> Result<StreamHandle, DispatchError> {
        let unified = adapter::parse_request(caller_shape, body)?;
        let ctx = unified.to_request_context();

        let resolver = RuleResolver::new(&self.rules);
        let resolved = resolver.resolve(&scenario, request_model, &ctx)?;
        let tactic = resolved.rule.tactic.clone();
        let candidates = resolved.services.to_vec();

        let mut excluded: HashSet<String> = HashSet::new();
        let mut last_failure: Option<DispatchError> = None;

        for attempt in 0..self.max_attempts {
            let remaining: Vec<_> = candidates
                .iter()
                .filter(|c| !excluded.contains(&format!("{}:{}", c.provider_id, c.model)))
                .cloned()
                .collect();
            if remaining.is_empty() {
                break;
            }

            let entry = match self.balancer.select(&self.providers, &remaining, &tactic).await {
                Ok(entry) => entry,
                Err(e) => return Err(e.into()),
            };
            let service_id = entry.service.id();

            let Some(provider) = self.providers.get(entry.service.provider_id) else {
                excluded.insert(service_id);
                continue;
            };

            let mut rendered_body = adapter::render_request(provider.api_style, &unified, &entry.service.model);
            apply_provider_transforms(&mut rendered_body, provider, &unified, &entry.service.model);
            let op = operation_for(provider.api_style);

            let send_result = self.transport.send(provider, op, rendered_body, true).await;
            let response = match send_result {
                Ok(r) => r,
                Err(e) => {
                    self.health.report_error(&service_id, e.to_string()).await;
                    let err: DispatchError = e.into();
                    let retry = err.kind.retry_eligible() && attempt + 1 < self.max_attempts;
                    excluded.insert(service_id);
                    last_failure = Some(err);
                    if retry {
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let transport_err = transport::error_from_response(response).await;
                self.classify_and_report(&service_id, status.as_u16()).await;
                let err: DispatchError = transport_err.into();
                let retry = err.kind.retry_eligible() && attempt + 1 < self.max_attempts;
                excluded.insert(service_id);
                last_failure = Some(err);
                if retry {
                    continue;
                }
                break;
            }

            return Ok(StreamHandle {
                response,
                provider_api_style: provider.api_style,
                entry,
                health: self.health.clone(),
                service_id,
                started: Instant::now(),
            });
        }

        Err(last_failure
            .unwrap_or_else(|| DispatchError::internal("retry loop exhausted with no attempts made")))
    }

    async fn classify_and_report(&self, service_id: &str, status: u16) {
        match crate::error::classify_upstream_status(status) {
            ErrorKind::AuthFailed => self.health.report_auth_error(service_id, status).await,
            ErrorKind::RateLimited => self.health.report_rate_limit(service_id).await,
            _ => {
                self.health
                    .report_error(service_id, format!("upstream status {status}"))
                    .await
            }
        }
    }
}

/// The still-open upstream connection for a streaming request, plus enough
/// context for the caller to finish the bookkeeping [`try_once`] does
/// inline for unary requests once it has drained the stream.
pub struct StreamHandle {
    pub response: reqwest::Response,
    pub provider_api_style: ApiStyle,
    pub entry: Arc<ServiceEntry>,
    pub health: Arc<HealthMonitor>,
    pub service_id: String,
    started: Instant,
}

impl StreamHandle {
    /// Record time-to-first-byte latency. Call this once, as soon as the
    /// caller observes the first translated event off the upstream stream —
    /// before the drain loop runs to completion. Separate from
    /// [`Self::record_completion`] because a stream's total duration is not
    /// its latency: a slow model can still open its stream fast.
    pub async fn record_first_byte(&self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.entry.stats.record_latency(elapsed_ms, DEFAULT_LATENCY_SAMPLES).await;
    }

    /// Record usage/token-speed once the stream has been drained (successfully
    /// or via cancellation, per §4.H's cancellation note — best-effort
    /// stats either way). `output_tokens_estimate` comes from the upstream's
    /// final usage field if the shape carries one, or a character-based
    /// estimate otherwise. Token speed is measured over the whole stream
    /// duration, not time-to-first-byte — see [`Self::record_first_byte`].
    pub async fn record_completion(&self, output_tokens_estimate: u64) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.entry.stats.record_usage(0, output_tokens_estimate).await;
        if elapsed_ms > 0.0 {
            let tps = output_tokens_estimate as f64 / (elapsed_ms / 1000.0);
            self.entry.stats.record_token_speed(tps, DEFAULT_TPS_SAMPLES).await;
        }
    }

    pub async fn report_success(&self) {
        self.health.report_success(&self.service_id).await;
    }

    pub async fn report_cancelled(&self) {
        self.health.report_error(&self.service_id, "caller cancelled stream").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthRecord, ProviderRegistry};
    use crate::rules::{ServiceRef, Tactic};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(id: Uuid, base_url: String) -> Provider {
        Provider {
            id,
            name: "test".to_string(),
            base_url,
            api_style: ApiStyle::Openai,
            auth: AuthRecord::BearerApiKey {
                api_key: "sk-test".to_string(),
            },
            proxy_url: None,
            timeout: None,
            tags: vec![],
            cached_models: vec![],
        }
    }

    fn rule(provider_id: Uuid) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            scenario: Scenario::Openai,
            request_model: "gpt-4o".to_string(),
            response_model: "gpt-4o".to_string(),
            description: "test rule".to_string(),
            active: true,
            tactic: Tactic::RoundRobin,
            services: vec![ServiceRef {
                provider_id,
                model: "gpt-4o".to_string(),
                weight: 1,
            }],
            smart_routing: vec![],
        }
    }

    #[tokio::test]
    async fn successful_dispatch_renders_caller_shape_and_records_stats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o",
                "choices": [{"message": {"role": "assistant", "content": "hi there"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5},
            })))
            .mount(&server)
            .await;

        let provider_id = Uuid::new_v4();
        let providers = Arc::new(ProviderRegistry::new(vec![provider(provider_id, server.uri())]));
        let balancer = Arc::new(LoadBalancer::new(
            Arc::new(crate::balancer::ServiceRegistry::new()),
            Arc::new(HealthMonitor::new(false, None)),
            1,
        ));
        let health = Arc::new(HealthMonitor::new(false, None));
        let transport = Arc::new(Transport::new(None));
        let orchestrator = DispatchOrchestrator::new(
            providers,
            vec![rule(provider_id)],
            balancer,
            health,
            transport,
        );

        let body = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 16,
        });
        let result = orchestrator
            .dispatch_unary(ApiStyle::Openai, Scenario::Openai, "gpt-4o", &body)
            .await
            .expect("dispatch succeeds");
        assert_eq!(result["choices"][0]["message"]["content"], "hi there");
    }

    #[tokio::test]
    async fn rate_limit_then_success_fails_over_to_second_service() {
        let s1 = MockServer::start().await;
        let s2 = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "rate limited"}})))
            .mount(&s1)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-2",
                "model": "gpt-4o",
                "choices": [{"message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
            })))
            .mount(&s2)
            .await;

        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let providers = Arc::new(ProviderRegistry::new(vec![
            provider(p1, s1.uri()),
            provider(p2, s2.uri()),
        ]));
        let balancer = Arc::new(LoadBalancer::new(
            Arc::new(crate::balancer::ServiceRegistry::new()),
            Arc::new(HealthMonitor::new(false, None)),
            1,
        ));
        let health = Arc::new(HealthMonitor::new(false, None));
        let transport = Arc::new(Transport::new(None));
        let mut r = rule(p1);
        r.services.push(ServiceRef {
            provider_id: p2,
            model: "gpt-4o".to_string(),
            weight: 1,
        });
        let orchestrator =
            DispatchOrchestrator::new(providers, vec![r], balancer, health.clone(), transport);

        let body = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let result = orchestrator
            .dispatch_unary(ApiStyle::Openai, Scenario::Openai, "gpt-4o", &body)
            .await
            .expect("fails over to the healthy service");
        assert_eq!(result["choices"][0]["message"]["content"], "ok");
    }

    #[tokio::test]
    async fn dispatch_stream_returns_handle_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let provider_id = Uuid::new_v4();
        let providers = Arc::new(ProviderRegistry::new(vec![provider(provider_id, server.uri())]));
        let balancer = Arc::new(LoadBalancer::new(
            Arc::new(crate::balancer::ServiceRegistry::new()),
            Arc::new(HealthMonitor::new(false, None)),
            1,
        ));
        let health = Arc::new(HealthMonitor::new(false, None));
        let transport = Arc::new(Transport::new(None));
        let orchestrator =
            DispatchOrchestrator::new(providers, vec![rule(provider_id)], balancer, health, transport);

        let body = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        });
        let handle = orchestrator
            .dispatch_stream(ApiStyle::Openai, Scenario::Openai, "gpt-4o", &body)
            .await
            .expect("stream dispatch succeeds");
        assert_eq!(handle.provider_api_style, ApiStyle::Openai);
        handle.record_first_byte().await;
        handle.record_completion(2).await;
        handle.report_success().await;
    }

    #[tokio::test]
    async fn first_byte_and_completion_record_distinct_measurements() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let provider_id = Uuid::new_v4();
        let providers = Arc::new(ProviderRegistry::new(vec![provider(provider_id, server.uri())]));
        let balancer = Arc::new(LoadBalancer::new(
            Arc::new(crate::balancer::ServiceRegistry::new()),
            Arc::new(HealthMonitor::new(false, None)),
            1,
        ));
        let health = Arc::new(HealthMonitor::new(false, None));
        let transport = Arc::new(Transport::new(None));
        let orchestrator =
            DispatchOrchestrator::new(providers, vec![rule(provider_id)], balancer, health, transport);

        let body = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        });
        let handle = orchestrator
            .dispatch_stream(ApiStyle::Openai, Scenario::Openai, "gpt-4o", &body)
            .await
            .expect("stream dispatch succeeds");

        // Simulate the drain loop: first byte observed promptly, completion
        // recorded only once the whole (slower) stream has finished.
        handle.record_first_byte().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.record_completion(10).await;

        let (.., latency_samples) = handle.entry.stats.get_latency_stats().await;
        let (_, speed_samples) = handle.entry.stats.get_token_speed_stats().await;
        assert_eq!(latency_samples, 1);
        assert_eq!(speed_samples, 1);
    }

    #[tokio::test]
    async fn no_rule_for_unknown_request_model_surfaces_as_no_rule() {
        let providers = Arc::new(ProviderRegistry::new(vec![]));
        let balancer = Arc::new(LoadBalancer::new(
            Arc::new(crate::balancer::ServiceRegistry::new()),
            Arc::new(HealthMonitor::new(false, None)),
            1,
        ));
        let health = Arc::new(HealthMonitor::new(false, None));
        let transport = Arc::new(Transport::new(None));
        let orchestrator = DispatchOrchestrator::new(providers, vec![], balancer, health, transport);

        let body = json!({"model": "unknown", "messages": []});
        let err = orchestrator
            .dispatch_unary(ApiStyle::Openai, Scenario::Openai, "unknown", &body)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoRule);
    }
}
