//! Service & ServiceStats (§4.A) — the routing unit and its mutable,
//! window-bounded usage/latency/throughput accounting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default accounting window, matching the glossary's "Window" default.
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// The routing unit: a (Provider, model) pair plus its weight/activity and
/// its own stats. Derived id is `provider:model`.
#[derive(Debug, Clone)]
pub struct Service {
    pub provider_id: Uuid,
    pub model: String,
    pub weight: u32,
    pub active: bool,
    pub window_secs: u64,
}

impl Service {
    pub fn id(&self) -> String {
        format!("{}:{}", self.provider_id, self.model)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct WindowCounters {
    start: Option<Instant>,
    request_count: u64,
    input_tokens: u64,
    output_tokens: u64,
}

impl WindowCounters {
    fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Latency/throughput and windowed request/token accounting for one
/// [`Service`]. Mutated only under its own lock; every accessor returns an
/// owned snapshot, never a reference into the buffers.
pub struct ServiceStats {
    window_secs: u64,
    inner: RwLock<StatsInner>,
}

struct StatsInner {
    total_requests: u64,
    last_used: Option<Instant>,
    window: WindowCounters,
    latency_samples_ms: VecDeque<f64>,
    tps_samples: VecDeque<f64>,
}

/// Snapshot of the percentile/average latency stats: (avg, p50, p95, p99, n).
pub type LatencyStats = (f64, f64, f64, f64, usize);
/// Snapshot of the average token-speed stats: (avg_tps, n).
pub type TokenSpeedStats = (f64, usize);

impl ServiceStats {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            inner: RwLock::new(StatsInner {
                total_requests: 0,
                last_used: None,
                window: WindowCounters::default(),
                latency_samples_ms: VecDeque::new(),
                tps_samples: VecDeque::new(),
            }),
        }
    }

    /// Roll the window if `now - window_start >= window_seconds`. Idempotent,
    /// and always applied before accumulation per §4.A semantics.
    fn roll_window_locked(&self, inner: &mut StatsInner, now: Instant) {
        match inner.window.start {
            None => inner.window.start = Some(now),
            Some(start) => {
                if now.duration_since(start) >= Duration::from_secs(self.window_secs) {
                    inner.window = WindowCounters {
                        start: Some(now),
                        ..Default::default()
                    };
                }
            }
        }
    }

    pub async fn record_usage(&self, in_toks: u64, out_toks: u64) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        self.roll_window_locked(&mut inner, now);
        inner.total_requests += 1;
        inner.last_used = Some(now);
        inner.window.request_count += 1;
        inner.window.input_tokens += in_toks;
        inner.window.output_tokens += out_toks;
    }

    /// (request_count, total_tokens) for the current window.
    pub async fn get_window_stats(&self) -> (u64, u64) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        self.roll_window_locked(&mut inner, now);
        (inner.window.request_count, inner.window.total_tokens())
    }

    /// (request_count, input_tokens, output_tokens) for the current window.
    pub async fn get_window_token_details(&self) -> (u64, u64, u64) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        self.roll_window_locked(&mut inner, now);
        (
            inner.window.request_count,
            inner.window.input_tokens,
            inner.window.output_tokens,
        )
    }

    pub async fn record_latency(&self, ms: f64, max_samples: usize) {
        let mut inner = self.inner.write().await;
        inner.latency_samples_ms.push_back(ms);
        while inner.latency_samples_ms.len() > max_samples {
            inner.latency_samples_ms.pop_front();
        }
    }

    pub async fn get_latency_stats(&self) -> LatencyStats {
        let inner = self.inner.read().await;
        percentile_stats(&inner.latency_samples_ms)
    }

    pub async fn record_token_speed(&self, tps: f64, max_samples: usize) {
        let mut inner = self.inner.write().await;
        inner.tps_samples.push_back(tps);
        while inner.tps_samples.len() > max_samples {
            inner.tps_samples.pop_front();
        }
    }

    pub async fn get_token_speed_stats(&self) -> TokenSpeedStats {
        let inner = self.inner.read().await;
        let n = inner.tps_samples.len();
        if n == 0 {
            return (0.0, 0);
        }
        (inner.tps_samples.iter().sum::<f64>() / n as f64, n)
    }

    /// Last-used instant, for round-robin/token-based tie-breaking (§4.E).
    pub async fn last_used(&self) -> Option<Instant> {
        self.inner.read().await.last_used
    }

    pub async fn reset_window(&self) {
        let mut inner = self.inner.write().await;
        inner.window = WindowCounters::default();
    }
}

/// Linear-interpolated percentiles over a sorted copy of `samples`: no
/// aliasing of the live buffer, and p50 ≤ p95 ≤ p99 holds by construction.
fn percentile_stats(samples: &VecDeque<f64>) -> LatencyStats {
    let n = samples.len();
    if n == 0 {
        return (0.0, 0.0, 0.0, 0.0, 0);
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let avg = sorted.iter().sum::<f64>() / n as f64;
    let p50 = interpolated_percentile(&sorted, 0.50);
    let p95 = interpolated_percentile(&sorted, 0.95);
    let p99 = interpolated_percentile(&sorted, 0.99);
    (avg, p50, p95, p99, n)
}

fn interpolated_percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_usage_accumulates_within_window() {
        let stats = ServiceStats::new(DEFAULT_WINDOW_SECS);
        stats.record_usage(10, 5).await;
        stats.record_usage(20, 15).await;
        assert_eq!(stats.get_window_token_details().await, (2, 30, 20));
        assert_eq!(stats.get_window_stats().await, (2, 50));
    }

    #[tokio::test]
    async fn window_rolls_after_inactivity() {
        let stats = ServiceStats::new(0);
        stats.record_usage(10, 5).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(stats.get_window_token_details().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn percentiles_are_monotonic_and_bounded_by_max_samples() {
        let stats = ServiceStats::new(DEFAULT_WINDOW_SECS);
        for ms in 1..=200u32 {
            stats.record_latency(ms as f64, 50).await;
        }
        let (avg, p50, p95, p99, n) = stats.get_latency_stats().await;
        assert_eq!(n, 50);
        assert!(avg > 0.0);
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[tokio::test]
    async fn single_sample_percentiles_equal_the_sample() {
        let stats = ServiceStats::new(DEFAULT_WINDOW_SECS);
        stats.record_latency(42.0, 10).await;
        let (avg, p50, p95, p99, n) = stats.get_latency_stats().await;
        assert_eq!(n, 1);
        assert_eq!(avg, 42.0);
        assert_eq!(p50, 42.0);
        assert_eq!(p95, 42.0);
        assert_eq!(p99, 42.0);
    }
}
