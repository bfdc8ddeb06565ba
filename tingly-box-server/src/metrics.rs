//! Ambient reporting (§6, §10.1): renders the dispatch core's live
//! service/health state as JSON (`GET /metrics`) and Prometheus text
//! exposition (`GET /metrics/prometheus`). This module holds no state of
//! its own — unlike the gateway's `MetricsCollector` it grew out of, the
//! dispatch core's `ServiceRegistry`/`HealthMonitor` already are the
//! metrics store, so this is a read-only renderer over them.

use serde_json::{json, Value};
use tingly_box_core::balancer::ServiceRegistry;
use tingly_box_core::health::{HealthMonitor, HealthStatus};

/// Aggregate counters and per-service detail for `GET /metrics`.
pub async fn aggregate(registry: &ServiceRegistry, health: &HealthMonitor) -> Value {
    let entries = registry.all().await;
    let snapshots = health.snapshots().await;
    let mut total_requests = 0u64;
    let mut services = Vec::with_capacity(entries.len());

    for entry in &entries {
        let id = entry.service.id();
        let (request_count, total_tokens) = entry.stats.get_window_stats().await;
        let (avg_latency_ms, p50, p95, p99, latency_samples) = entry.stats.get_latency_stats().await;
        let (avg_tps, tps_samples) = entry.stats.get_token_speed_stats().await;
        total_requests += request_count;

        let healthy = snapshots
            .get(&id)
            .map(|s| s.status == HealthStatus::Healthy)
            .unwrap_or(true);

        services.push(json!({
            "service_id": id,
            "provider_id": entry.service.provider_id,
            "model": entry.service.model,
            "active": entry.service.active,
            "healthy": healthy,
            "window_request_count": request_count,
            "window_total_tokens": total_tokens,
            "latency_ms": {
                "avg": avg_latency_ms,
                "p50": p50,
                "p95": p95,
                "p99": p99,
                "samples": latency_samples,
            },
            "tokens_per_second": {
                "avg": avg_tps,
                "samples": tps_samples,
            },
        }));
    }

    json!({
        "total_requests": total_requests,
        "services": services,
    })
}

/// Prometheus text exposition for `GET /metrics/prometheus`.
pub async fn prometheus(registry: &ServiceRegistry, health: &HealthMonitor) -> String {
    let entries = registry.all().await;
    let snapshots = health.snapshots().await;
    let mut out = String::new();

    out.push_str("# HELP tingly_box_service_window_requests Requests observed in the current window, per service.\n");
    out.push_str("# TYPE tingly_box_service_window_requests gauge\n");
    for entry in &entries {
        let id = entry.service.id();
        let (request_count, _) = entry.stats.get_window_stats().await;
        out.push_str(&format!(
            "tingly_box_service_window_requests{{service=\"{id}\"}} {request_count}\n"
        ));
    }

    out.push_str("# HELP tingly_box_service_healthy Whether a service is currently healthy (1) or not (0).\n");
    out.push_str("# TYPE tingly_box_service_healthy gauge\n");
    for entry in &entries {
        let id = entry.service.id();
        let healthy = snapshots
            .get(&id)
            .map(|s| s.status == HealthStatus::Healthy)
            .unwrap_or(true);
        out.push_str(&format!(
            "tingly_box_service_healthy{{service=\"{id}\"}} {}\n",
            if healthy { 1 } else { 0 }
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tingly_box_core::balancer::LoadBalancer;
    use tingly_box_core::rules::{ServiceRef, Tactic};
    use tingly_box_core::model::{ApiStyle, AuthRecord, Provider, ProviderRegistry};
    use uuid::Uuid;

    #[tokio::test]
    async fn aggregate_reports_a_selected_service() {
        let registry = Arc::new(ServiceRegistry::new());
        let health = Arc::new(HealthMonitor::new(false, None));
        let balancer = LoadBalancer::new(registry.clone(), health.clone(), 1);
        let provider_id = Uuid::new_v4();
        let candidates = vec![ServiceRef {
            provider_id,
            model: "gpt-4o".to_string(),
            weight: 1,
        }];
        let providers = ProviderRegistry::new(vec![Provider {
            id: provider_id,
            name: "a".to_string(),
            base_url: "https://example.test".to_string(),
            api_style: ApiStyle::Openai,
            auth: AuthRecord::BearerApiKey {
                api_key: "unset".to_string(),
            },
            proxy_url: None,
            timeout: None,
            tags: vec![],
            cached_models: vec![],
        }]);
        let _ = balancer.select(&providers, &candidates, &Tactic::RoundRobin).await;

        let report = aggregate(&registry, &health).await;
        assert_eq!(report["services"].as_array().unwrap().len(), 1);
    }
}
