//! HTTP server assembly: builds the shared [`AppState`] from a loaded
//! [`RoutingConfig`] and wires the axum [`Router`] for the external surface
//! in §6. Mirrors the gateway's `create_server`/`AppState` shape, minus the
//! cache/plugin/dashboard layers this crate has no counterpart for.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tingly_box_core::balancer::{LoadBalancer, ServiceRegistry};
use tingly_box_core::config::RoutingConfig;
use tingly_box_core::health::HealthMonitor;
use tingly_box_core::transport::Transport;
use tingly_box_core::DispatchOrchestrator;

use crate::handlers;

const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);
const LOAD_BALANCER_SEED: u64 = 0x7477_626f_7820_3432;

/// Shared state for every handler: the immutable routing snapshot, the
/// dispatch orchestrator, and the registries the ambient `/metrics`
/// endpoints read directly (the orchestrator itself does not expose them).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RoutingConfig>,
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub service_registry: Arc<ServiceRegistry>,
    pub health: Arc<HealthMonitor>,
}

/// Build the dispatch core and the axum router over it.
pub async fn create_server(config: RoutingConfig) -> anyhow::Result<Router> {
    let config = Arc::new(config);
    let health = Arc::new(HealthMonitor::new(true, None));
    let service_registry = Arc::new(ServiceRegistry::new());
    let balancer = Arc::new(LoadBalancer::new(
        service_registry.clone(),
        health.clone(),
        LOAD_BALANCER_SEED,
    ));
    let transport = Arc::new(Transport::new(None));

    let orchestrator = Arc::new(DispatchOrchestrator::new(
        Arc::new(config.providers.clone()),
        config.rules.clone(),
        balancer,
        health.clone(),
        transport,
    ));

    let state = AppState {
        config,
        orchestrator,
        service_registry,
        health,
    };

    let app = Router::new()
        .route(
            "/tingly/openai/v1/chat/completions",
            post(handlers::openai_chat_completions),
        )
        .route("/tingly/anthropic/v1/messages", post(handlers::anthropic_messages))
        .route("/tingly/responses/v1/responses", post(handlers::responses_create))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(DEFAULT_REQUEST_TIMEOUT)),
        )
        .with_state(state);

    Ok(app)
}
