//! Layered configuration loading (§10.3): a TOML file, environment-variable
//! overrides for secrets, and a startup validation pass. Produces an
//! immutable [`RoutingConfig`] snapshot — the dispatch core never reloads
//! or mutates it at runtime.

use crate::model::{Provider, ProviderRegistry};
use crate::rules::Rule;
use crate::smart_routing;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;

/// On-disk shape: flat lists of providers and rules, matching §3's data
/// model field-for-field. Not itself the contract — just this loader's
/// TOML rendering of it.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    providers: Vec<Provider>,
    #[serde(default)]
    rules: Vec<Rule>,
}

/// The immutable snapshot handed to the dispatch core at construction time.
/// Config reload is out of scope: Rules/Providers are config-layer-owned
/// and read-only for the process lifetime.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub providers: ProviderRegistry,
    pub rules: Vec<Rule>,
}

impl RoutingConfig {
    /// Load `path`, apply `TINGLY_PROVIDER_<NAME>_API_KEY`-style secret
    /// overrides, then validate per §10.3 before returning.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading routing config at {path}"))?;
        let mut raw: RawConfig = toml::from_str(&content)
            .with_context(|| format!("parsing routing config at {path}"))?;

        apply_env_overrides(&mut raw.providers);

        let config = RoutingConfig {
            providers: ProviderRegistry::new(raw.providers),
            rules: raw.rules,
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup validation (§10.3): at most one active rule per
    /// (scenario, request_model); every smart-routing op load-time valid;
    /// every service's provider UUID resolvable.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !rule.active {
                continue;
            }
            let key = (rule.scenario.clone(), rule.request_model.clone());
            if !seen.insert(key) {
                return Err(anyhow!(
                    "more than one active rule for scenario={} request_model={}",
                    rule.scenario,
                    rule.request_model
                ));
            }

            for service in &rule.services {
                if self.providers.get(service.provider_id).is_none() {
                    return Err(anyhow!(
                        "rule {} references unresolvable provider {}",
                        rule.id,
                        service.provider_id
                    ));
                }
            }

            for smart in &rule.smart_routing {
                for op in &smart.ops {
                    smart_routing::validate(op)
                        .with_context(|| format!("rule {} smart-routing op invalid", rule.id))?;
                }
                for service in &smart.services {
                    if self.providers.get(service.provider_id).is_none() {
                        return Err(anyhow!(
                            "rule {} smart-routing service references unresolvable provider {}",
                            rule.id,
                            service.provider_id
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Secret-bearing fields only: `TINGLY_PROVIDER_<UPPER_SNAKE_NAME>_API_KEY`
/// overrides a provider's api-key-shaped auth record, matching the
/// gateway's `GATEWAY_*` override convention without touching routing
/// topology via the environment.
fn apply_env_overrides(providers: &mut [Provider]) {
    for provider in providers.iter_mut() {
        let var = format!("TINGLY_PROVIDER_{}_API_KEY", screaming_snake(&provider.name));
        let Ok(value) = env::var(&var) else {
            continue;
        };
        match &mut provider.auth {
            crate::model::AuthRecord::BearerApiKey { api_key }
            | crate::model::AuthRecord::XApiKeyHeader { api_key } => {
                *api_key = value;
            }
            crate::model::AuthRecord::OauthToken { access_token, .. } => {
                *access_token = value;
            }
        }
    }
}

fn screaming_snake(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
