//! # Tingly Box core
//!
//! The request dispatch core behind Tingly Box: a provider-agnostic proxy
//! that presents OpenAI- and Anthropic-wire-compatible chat APIs and routes
//! each request to a configured upstream LLM provider.
//!
//! ## Components
//!
//! - [`model`] — [`model::Provider`], [`model::ProviderRegistry`], auth
//!   records, and the per-request [`model::RequestContext`].
//! - [`service`] / [`health`] — the routing unit and its stats, and the
//!   per-service health FSM with probe-gated recovery.
//! - [`rules`] / [`smart_routing`] — routing clauses and the predicate DSL
//!   that can override a rule's service list per request.
//! - [`balancer`] — tactic-driven service selection among a rule's
//!   candidates, respecting health.
//! - [`adapter`] — bidirectional translation between the OpenAI, Anthropic,
//!   and Responses wire shapes via a single intermediate representation.
//! - [`transport`] — per-provider HTTP dispatch: auth headers, proxy,
//!   OAuth refresh-and-retry.
//! - [`dispatch`] — the orchestrator tying the above into one request's
//!   resolve → select → adapt → send → retry lifecycle.
//! - [`config`] — TOML + env-override loading of the immutable
//!   [`config::RoutingConfig`] snapshot handed to the core at startup.
//!
//! ## Example
//!
//! ```no_run
//! use tingly_box_core::config::RoutingConfig;
//! use tingly_box_core::dispatch::DispatchOrchestrator;
//! use tingly_box_core::balancer::{LoadBalancer, ServiceRegistry};
//! use tingly_box_core::health::HealthMonitor;
//! use tingly_box_core::transport::Transport;
//! use std::sync::Arc;
//!
//! # fn build() -> anyhow::Result<()> {
//! let routing = RoutingConfig::load("routing.toml")?;
//! let health = Arc::new(HealthMonitor::new(true, None));
//! let balancer = Arc::new(LoadBalancer::new(Arc::new(ServiceRegistry::new()), health.clone(), 42));
//! let transport = Arc::new(Transport::new(None));
//! let _orchestrator = DispatchOrchestrator::new(
//!     Arc::new(routing.providers),
//!     routing.rules,
//!     balancer,
//!     health,
//!     transport,
//! );
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod balancer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod model;
pub mod rules;
pub mod service;
pub mod smart_routing;
pub mod transport;

pub use config::RoutingConfig;
pub use dispatch::{DispatchOrchestrator, StreamHandle};
pub use error::{DispatchError, ErrorKind};
pub use model::{ApiStyle, Provider, ProviderRegistry, RequestContext, Scenario};
