//! Upstream transport (§4.G): builds and sends the per-provider HTTP
//! request, handles provider-specific auth headers, OAuth refresh-and-retry,
//! and owns the one-client-per-(provider × proxy) pool.

use crate::error::TransportError;
use crate::model::{ApiStyle, AuthRecord, Provider};
use async_trait::async_trait;
use reqwest::{Client, Proxy, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Refreshes an OAuth access token. Injected at construction, like the
/// health monitor's probe — transport never hand-rolls its own refresh
/// network call. Returns (access_token, refresh_token).
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider_id: Uuid,
        refresh_token: &str,
    ) -> Result<(String, Option<String>), TransportError>;
}

/// What operation the caller is dispatching, used to pick the upstream path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Chat,
    Messages,
    Responses,
}

fn upstream_path(api_style: ApiStyle, op: Operation) -> &'static str {
    match (api_style, op) {
        (_, Operation::Messages) => "/v1/messages",
        (_, Operation::Responses) => "/v1/responses",
        (ApiStyle::Google, Operation::Chat) => "/v1beta/openai/chat/completions",
        (_, Operation::Chat) => "/v1/chat/completions",
    }
}

/// A refreshed access token carried forward for the single retry §4.G
/// allows; never persisted back into the provider snapshot (config is
/// construction-time immutable, §10.3).
struct RefreshedAuth {
    access_token: String,
}

pub struct Transport {
    clients: RwLock<HashMap<(Uuid, Option<String>), Client>>,
    refresher: Option<std::sync::Arc<dyn TokenRefresher>>,
}

impl Transport {
    pub fn new(refresher: Option<std::sync::Arc<dyn TokenRefresher>>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            refresher,
        }
    }

    async fn client_for(&self, provider: &Provider) -> Result<Client, TransportError> {
        let key = (provider.id, provider.proxy_url.clone());
        if let Some(c) = self.clients.read().await.get(&key) {
            return Ok(c.clone());
        }
        let mut builder = Client::builder().connect_timeout(
            provider.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        );
        if let Some(proxy_url) = &provider.proxy_url {
            let proxy = Proxy::all(proxy_url).map_err(TransportError::Http)?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(TransportError::Http)?;
        self.clients.write().await.insert(key, client.clone());
        Ok(client)
    }

    fn apply_auth(
        request: reqwest::RequestBuilder,
        api_style: ApiStyle,
        auth: &AuthRecord,
        refreshed: Option<&RefreshedAuth>,
    ) -> reqwest::RequestBuilder {
        let mut request = request;
        if api_style == ApiStyle::Anthropic {
            request = request.header("anthropic-version", ANTHROPIC_VERSION);
        }
        match auth {
            AuthRecord::BearerApiKey { api_key } => request.bearer_auth(api_key),
            AuthRecord::XApiKeyHeader { api_key } => request.header("x-api-key", api_key),
            AuthRecord::OauthToken { access_token, .. } => {
                let token = refreshed.map(|r| r.access_token.as_str()).unwrap_or(access_token);
                request.bearer_auth(token)
            }
        }
    }

    /// Send one upstream request, retrying once on a 401 for OAuth
    /// providers with a registered refresher. All other classification is
    /// left to the caller via [`crate::error::classify_upstream_status`].
    pub async fn send(
        &self,
        provider: &Provider,
        op: Operation,
        body: Value,
        stream: bool,
    ) -> Result<Response, TransportError> {
        let client = self.client_for(provider).await?;
        let url = format!("{}{}", provider.base_url.trim_end_matches('/'), upstream_path(provider.api_style, op));

        let response = self.dispatch_once(&client, &url, provider, &body, stream, None).await?;

        if response.status().as_u16() != 401 {
            return Ok(response);
        }

        let AuthRecord::OauthToken {
            refresh_token: Some(refresh_token),
            ..
        } = &provider.auth
        else {
            return Ok(response);
        };
        let Some(refresher) = &self.refresher else {
            return Ok(response);
        };

        let (access_token, _new_refresh) = refresher.refresh(provider.id, refresh_token).await?;
        let refreshed = RefreshedAuth { access_token };
        self.dispatch_once(&client, &url, provider, &body, stream, Some(&refreshed))
            .await
    }

    async fn dispatch_once(
        &self,
        client: &Client,
        url: &str,
        provider: &Provider,
        body: &Value,
        stream: bool,
        refreshed: Option<&RefreshedAuth>,
    ) -> Result<Response, TransportError> {
        let mut body = body.clone();
        if stream {
            body["stream"] = Value::Bool(true);
        }
        let request = client.post(url).json(&body);
        let request = Self::apply_auth(request, provider.api_style, &provider.auth, refreshed);
        request.send().await.map_err(TransportError::Http)
    }
}

/// Drain a non-2xx response into a [`TransportError::UpstreamStatus`].
pub async fn error_from_response(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::UpstreamStatus { status, body }
}
