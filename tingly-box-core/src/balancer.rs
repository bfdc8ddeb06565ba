//! Load balancer (§4.E): filters a rule's candidate service list by
//! resolvability/activity/health, then selects one under the rule's tactic.
//!
//! One method per tactic, mirroring the dispatch-table-per-variant shape
//! used for routing strategies elsewhere in this codebase. `random` and the
//! exploration draws in `latency_based`/`speed_based` share a single
//! internally-synchronised PRNG (§5).

use crate::error::BalancerError;
use crate::health::HealthMonitor;
use crate::model::ProviderRegistry;
use crate::rules::{ServiceRef, Tactic};
use crate::service::{Service, ServiceStats, DEFAULT_WINDOW_SECS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// A registry-owned (Service, ServiceStats) pair, keyed by `Service::id()`.
pub struct ServiceEntry {
    pub service: Service,
    pub stats: ServiceStats,
}

/// Holds every service's persistent stats for the process lifetime.
/// Entries are created lazily the first time a rule references a
/// (provider, model) pair — the same lazy-insert pattern as the health
/// monitor's id→record map.
pub struct ServiceRegistry {
    entries: RwLock<HashMap<String, Arc<ServiceEntry>>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_insert(&self, provider_id: Uuid, model: &str, weight: u32) -> Arc<ServiceEntry> {
        let id = format!("{provider_id}:{model}");
        if let Some(e) = self.entries.read().await.get(&id) {
            return e.clone();
        }
        let mut write = self.entries.write().await;
        write
            .entry(id)
            .or_insert_with(|| {
                Arc::new(ServiceEntry {
                    service: Service {
                        provider_id,
                        model: model.to_string(),
                        weight,
                        active: true,
                        window_secs: DEFAULT_WINDOW_SECS,
                    },
                    stats: ServiceStats::new(DEFAULT_WINDOW_SECS),
                })
            })
            .clone()
    }

    /// Administrative deactivation (e.g. a config reload or an operator
    /// action), distinct from health-driven unavailability.
    pub async fn set_active(&self, provider_id: Uuid, model: &str, active: bool) {
        let id = format!("{provider_id}:{model}");
        if let Some(entry) = self.entries.read().await.get(&id) {
            // Service isn't internally mutable; recreate the entry with the
            // stats carried over so in-flight accounting survives.
            let replacement = Arc::new(ServiceEntry {
                service: Service {
                    active,
                    ..entry.service.clone()
                },
                stats: ServiceStats::new(entry.service.window_secs),
            });
            drop(entry);
            self.entries.write().await.insert(id, replacement);
            return;
        }
        let _ = self.get_or_insert(provider_id, model, 1).await;
    }

    /// Every known service entry, for ambient reporting (`GET /metrics`).
    pub async fn all(&self) -> Vec<Arc<ServiceEntry>> {
        self.entries.read().await.values().cloned().collect()
    }
}

/// `metric` is already weight-normalised (raw count or tokens divided by the
/// service's weight) — comparing these directly realises the "higher-weight
/// entries duplicated weight-count times in the candidate list" rotation
/// from §4.E without materialising the duplicates: a weight-3 service's
/// normalised count only grows a third as fast as a weight-1 service's, so
/// it absorbs three times as many selections before looking equally "used".
fn is_better_candidate(
    metric: f64,
    last_used: Option<Instant>,
    best_metric: f64,
    best_last: Option<Instant>,
) -> bool {
    if (metric - best_metric).abs() > f64::EPSILON {
        return metric < best_metric;
    }
    match (last_used, best_last) {
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (None, None) => false,
        (Some(a), Some(b)) => a < b,
    }
}

pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    health: Arc<HealthMonitor>,
    rng: Mutex<StdRng>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, health: Arc<HealthMonitor>, seed: u64) -> Self {
        Self {
            registry,
            health,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Resolve `candidates` to registry entries, drop everything unresolvable
    /// / inactive / zero-weight / unhealthy, and select one per `tactic`.
    pub async fn select(
        &self,
        providers: &ProviderRegistry,
        candidates: &[ServiceRef],
        tactic: &Tactic,
    ) -> Result<Arc<ServiceEntry>, BalancerError> {
        let mut filtered = Vec::with_capacity(candidates.len());
        for c in candidates {
            if providers.get(c.provider_id).is_none() || c.weight == 0 {
                continue;
            }
            let entry = self.registry.get_or_insert(c.provider_id, &c.model, c.weight).await;
            if !entry.service.active {
                continue;
            }
            if !self.health.is_healthy(&entry.service.id()).await {
                continue;
            }
            filtered.push(entry);
        }

        if filtered.is_empty() {
            return Err(BalancerError::NoHealthyService {
                candidates: candidates.len(),
            });
        }

        let selected = match tactic {
            Tactic::RoundRobin => self.select_round_robin(&filtered).await,
            Tactic::TokenBased { .. } => self.select_token_based(&filtered).await,
            Tactic::Hybrid {
                max_requests,
                max_tokens,
            } => self.select_hybrid(&filtered, *max_requests, *max_tokens).await,
            Tactic::Random => self.select_random(&filtered).await,
            Tactic::LatencyBased {
                min_samples,
                explore_ratio,
            } => {
                self.select_latency_based(&filtered, *min_samples, *explore_ratio)
                    .await
            }
            Tactic::SpeedBased {
                min_samples,
                explore_ratio,
            } => {
                self.select_speed_based(&filtered, *min_samples, *explore_ratio)
                    .await
            }
            Tactic::Adaptive {
                w_lat,
                w_load,
                w_speed,
            } => self.select_adaptive(&filtered, *w_lat, *w_load, *w_speed).await,
        };
        Ok(selected)
    }

    async fn select_round_robin(&self, filtered: &[Arc<ServiceEntry>]) -> Arc<ServiceEntry> {
        let mut best_idx = 0;
        let mut best_metric = f64::INFINITY;
        let mut best_last = None;
        for (i, e) in filtered.iter().enumerate() {
            let (count, _) = e.stats.get_window_stats().await;
            let metric = count as f64 / e.service.weight.max(1) as f64;
            let last_used = e.stats.last_used().await;
            if i == 0 || is_better_candidate(metric, last_used, best_metric, best_last) {
                best_idx = i;
                best_metric = metric;
                best_last = last_used;
            }
        }
        filtered[best_idx].clone()
    }

    async fn select_token_based(&self, filtered: &[Arc<ServiceEntry>]) -> Arc<ServiceEntry> {
        let mut best_idx = 0;
        let mut best_metric = f64::INFINITY;
        let mut best_last = None;
        for (i, e) in filtered.iter().enumerate() {
            let (_, tokens) = e.stats.get_window_stats().await;
            let metric = tokens as f64 / e.service.weight.max(1) as f64;
            let last_used = e.stats.last_used().await;
            if i == 0 || is_better_candidate(metric, last_used, best_metric, best_last) {
                best_idx = i;
                best_metric = metric;
                best_last = last_used;
            }
        }
        filtered[best_idx].clone()
    }

    async fn select_hybrid(
        &self,
        filtered: &[Arc<ServiceEntry>],
        max_requests: u64,
        max_tokens: u64,
    ) -> Arc<ServiceEntry> {
        let mut non_exhausted = Vec::new();
        for e in filtered {
            let (count, tokens) = e.stats.get_window_stats().await;
            if count < max_requests && tokens < max_tokens {
                non_exhausted.push(e.clone());
            }
        }
        if non_exhausted.is_empty() {
            self.select_round_robin(filtered).await
        } else {
            self.select_round_robin(&non_exhausted).await
        }
    }

    async fn select_random(&self, filtered: &[Arc<ServiceEntry>]) -> Arc<ServiceEntry> {
        let total_weight: u64 = filtered.iter().map(|e| e.service.weight as u64).sum();
        if total_weight == 0 {
            return filtered[0].clone();
        }
        let draw = {
            let mut rng = self.rng.lock().await;
            rng.gen_range(0..total_weight)
        };
        let mut cumulative = 0u64;
        for e in filtered {
            cumulative += e.service.weight as u64;
            if draw < cumulative {
                return e.clone();
            }
        }
        filtered[filtered.len() - 1].clone()
    }

    async fn select_latency_based(
        &self,
        filtered: &[Arc<ServiceEntry>],
        min_samples: usize,
        explore_ratio: f64,
    ) -> Arc<ServiceEntry> {
        let mut unknown = Vec::new();
        let mut known: Vec<(Arc<ServiceEntry>, f64)> = Vec::new();
        for e in filtered {
            let (_, _, p95, _, n) = e.stats.get_latency_stats().await;
            if n < min_samples {
                unknown.push(e.clone());
            } else {
                known.push((e.clone(), p95));
            }
        }
        self.explore_or_exploit(unknown, known, explore_ratio, |a, b| {
            a.partial_cmp(b).unwrap()
        })
        .await
    }

    async fn select_speed_based(
        &self,
        filtered: &[Arc<ServiceEntry>],
        min_samples: usize,
        explore_ratio: f64,
    ) -> Arc<ServiceEntry> {
        let mut unknown = Vec::new();
        let mut known: Vec<(Arc<ServiceEntry>, f64)> = Vec::new();
        for e in filtered {
            let (avg, n) = e.stats.get_token_speed_stats().await;
            if n < min_samples {
                unknown.push(e.clone());
            } else {
                known.push((e.clone(), avg));
            }
        }
        // Maximise speed: invert comparator so the "lowest score wins" helper
        // below picks the fastest service.
        self.explore_or_exploit(unknown, known, explore_ratio, |a, b| b.partial_cmp(a).unwrap())
            .await
    }

    /// Shared unknown/known tie-break for `latency_based`/`speed_based`:
    /// with probability `explore_ratio`, prefer an under-sampled ("unknown")
    /// service; otherwise pick the best-scoring known service via `cmp`.
    async fn explore_or_exploit(
        &self,
        unknown: Vec<Arc<ServiceEntry>>,
        known: Vec<(Arc<ServiceEntry>, f64)>,
        explore_ratio: f64,
        cmp: impl Fn(&f64, &f64) -> std::cmp::Ordering,
    ) -> Arc<ServiceEntry> {
        if !unknown.is_empty() {
            let roll = {
                let mut rng = self.rng.lock().await;
                rng.gen::<f64>()
            };
            if roll < explore_ratio || known.is_empty() {
                let idx = {
                    let mut rng = self.rng.lock().await;
                    rng.gen_range(0..unknown.len())
                };
                return unknown[idx].clone();
            }
        }
        known
            .iter()
            .min_by(|a, b| cmp(&a.1, &b.1))
            .map(|(e, _)| e.clone())
            .unwrap_or_else(|| unknown[0].clone())
    }

    async fn select_adaptive(
        &self,
        filtered: &[Arc<ServiceEntry>],
        w_lat: f64,
        w_load: f64,
        w_speed: f64,
    ) -> Arc<ServiceEntry> {
        let mut p95s = Vec::with_capacity(filtered.len());
        let mut loads = Vec::with_capacity(filtered.len());
        let mut tps = Vec::with_capacity(filtered.len());
        for e in filtered {
            let (_, _, p95, _, _) = e.stats.get_latency_stats().await;
            let (count, _) = e.stats.get_window_stats().await;
            let (speed, _) = e.stats.get_token_speed_stats().await;
            p95s.push(p95);
            loads.push(count as f64);
            tps.push(speed);
        }

        let mut best_idx = 0;
        let mut best_score = f64::INFINITY;
        for i in 0..filtered.len() {
            let score = w_lat * normalize(&p95s, p95s[i])
                + w_load * normalize(&loads, loads[i])
                + w_speed * (1.0 - normalize(&tps, tps[i]));
            if score < best_score {
                best_score = score;
                best_idx = i;
            }
        }
        filtered[best_idx].clone()
    }
}

fn normalize(values: &[f64], x: f64) -> f64 {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        0.0
    } else {
        (x - min) / (max - min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiStyle, AuthRecord, Provider, ProviderRegistry};

    fn provider(id: Uuid) -> Provider {
        Provider {
            id,
            name: "test-provider".to_string(),
            base_url: "https://example.test".to_string(),
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

    fn setup() -> (ProviderRegistry, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let providers = ProviderRegistry::new(vec![provider(a), provider(b)]);
        (providers, a, b)
    }

    #[tokio::test]
    async fn unresolvable_provider_is_dropped() {
        let (providers, a, _b) = setup();
        let balancer = LoadBalancer::new(
            Arc::new(ServiceRegistry::new()),
            Arc::new(HealthMonitor::new(false, None)),
            1,
        );
        let candidates = vec![
            ServiceRef {
                provider_id: a,
                model: "gpt-4o".to_string(),
                weight: 1,
            },
            ServiceRef {
                provider_id: Uuid::new_v4(),
                model: "gpt-4o".to_string(),
                weight: 1,
            },
        ];
        let chosen = balancer
            .select(&providers, &candidates, &Tactic::RoundRobin)
            .await
            .expect("one healthy candidate remains");
        assert_eq!(chosen.service.provider_id, a);
    }

    #[tokio::test]
    async fn all_unhealthy_yields_no_healthy_service() {
        let (providers, a, _b) = setup();
        let health = Arc::new(HealthMonitor::new(false, None));
        health.report_auth_error(&format!("{a}:gpt-4o"), 401).await;
        let balancer = LoadBalancer::new(Arc::new(ServiceRegistry::new()), health, 1);
        let candidates = vec![ServiceRef {
            provider_id: a,
            model: "gpt-4o".to_string(),
            weight: 1,
        }];
        let err = balancer
            .select(&providers, &candidates, &Tactic::RoundRobin)
            .await
            .unwrap_err();
        matches!(err, BalancerError::NoHealthyService { .. });
    }

    #[tokio::test]
    async fn round_robin_prefers_least_recently_used() {
        let (providers, a, b) = setup();
        let registry = Arc::new(ServiceRegistry::new());
        let balancer = LoadBalancer::new(registry.clone(), Arc::new(HealthMonitor::new(false, None)), 1);
        let candidates = vec![
            ServiceRef {
                provider_id: a,
                model: "gpt-4o".to_string(),
                weight: 1,
            },
            ServiceRef {
                provider_id: b,
                model: "gpt-4o".to_string(),
                weight: 1,
            },
        ];

        let first = balancer
            .select(&providers, &candidates, &Tactic::RoundRobin)
            .await
            .unwrap();
        first.stats.record_usage(10, 10).await;

        let second = balancer
            .select(&providers, &candidates, &Tactic::RoundRobin)
            .await
            .unwrap();
        assert_ne!(first.service.provider_id, second.service.provider_id);
    }

    #[tokio::test]
    async fn hybrid_falls_back_to_round_robin_when_all_exhausted() {
        let (providers, a, b) = setup();
        let registry = Arc::new(ServiceRegistry::new());
        let balancer = LoadBalancer::new(registry, Arc::new(HealthMonitor::new(false, None)), 1);
        let candidates = vec![
            ServiceRef {
                provider_id: a,
                model: "gpt-4o".to_string(),
                weight: 1,
            },
            ServiceRef {
                provider_id: b,
                model: "gpt-4o".to_string(),
                weight: 1,
            },
        ];
        let tactic = Tactic::Hybrid {
            max_requests: 1,
            max_tokens: 1_000_000,
        };

        let first = balancer.select(&providers, &candidates, &tactic).await.unwrap();
        first.stats.record_usage(1, 1).await;
        let second = balancer.select(&providers, &candidates, &tactic).await.unwrap();
        second.stats.record_usage(1, 1).await;

        // Both now exhausted on request count; selection should still succeed
        // via the round-robin fallback rather than erroring.
        let third = balancer.select(&providers, &candidates, &tactic).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn round_robin_favors_higher_weight_service_proportionally() {
        let (providers, a, b) = setup();
        let registry = Arc::new(ServiceRegistry::new());
        let balancer = LoadBalancer::new(registry, Arc::new(HealthMonitor::new(false, None)), 1);
        let candidates = vec![
            ServiceRef {
                provider_id: a,
                model: "gpt-4o".to_string(),
                weight: 3,
            },
            ServiceRef {
                provider_id: b,
                model: "gpt-4o".to_string(),
                weight: 1,
            },
        ];

        let mut count_a = 0u32;
        let mut count_b = 0u32;
        for _ in 0..20 {
            let chosen = balancer
                .select(&providers, &candidates, &Tactic::RoundRobin)
                .await
                .unwrap();
            chosen.stats.record_usage(1, 1).await;
            if chosen.service.provider_id == a {
                count_a += 1;
            } else {
                count_b += 1;
            }
        }

        assert!(
            count_a >= count_b * 2,
            "weight-3 service should be selected roughly 3x as often as weight-1 (got {count_a} vs {count_b})"
        );
    }

    #[tokio::test]
    async fn random_never_selects_a_zero_weight_service() {
        let (providers, a, b) = setup();
        let registry = Arc::new(ServiceRegistry::new());
        let balancer = LoadBalancer::new(registry, Arc::new(HealthMonitor::new(false, None)), 7);
        let candidates = vec![
            ServiceRef {
                provider_id: a,
                model: "gpt-4o".to_string(),
                weight: 0,
            },
            ServiceRef {
                provider_id: b,
                model: "gpt-4o".to_string(),
                weight: 5,
            },
        ];
        for _ in 0..20 {
            let chosen = balancer
                .select(&providers, &candidates, &Tactic::Random)
                .await
                .unwrap();
            assert_eq!(chosen.service.provider_id, b);
        }
    }
}
