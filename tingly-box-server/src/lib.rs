//! # Tingly Box server
//!
//! The HTTP surface over the `tingly-box-core` dispatch engine: a
//! provider-agnostic LLM proxy presenting OpenAI-style and Anthropic-style
//! wire-compatible APIs.
//!
//! ## Architecture
//!
//! - **`auth`**: caller bearer-key prefix validation.
//! - **`gateway_error`**: per-wire-shape error envelope rendering.
//! - **`handlers`**: the external HTTP surface — chat/messages/responses
//!   dispatch, model listing, health and metrics.
//! - **`metrics`**: stateless JSON/Prometheus rendering over the dispatch
//!   core's live `ServiceRegistry`/`HealthMonitor`.
//! - **`server`**: shared [`AppState`](server::AppState) and axum [`Router`](axum::Router) assembly.
//!
//! ## Quick start
//!
//! ```no_run
//! use tingly_box_core::config::RoutingConfig;
//! use tingly_box_server::create_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RoutingConfig::load("routing.toml")?;
//!     let app = create_server(config).await?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod gateway_error;
pub mod handlers;
pub mod metrics;
pub mod server;

pub use server::create_server;
