//! Health monitor (§4.B): per-service failure tracking with probe-gated
//! recovery. Two states only — Healthy and Unhealthy — unlike a generic
//! three-state circuit breaker: there is no half-open state here, because
//! recovery is decided by an explicit probe call on the read path rather
//! than a cooldown-then-trial-request cycle.
//!
//! Concurrency mirrors §5: a top-level lock on the id→record map guards
//! record creation/removal only; each record carries its own lock for
//! field mutation, and readers take both locks shared.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const DEFAULT_CONSECUTIVE_ERROR_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub last_error_at: Option<Instant>,
    pub consecutive_errors: u32,
    pub rate_limited: bool,
    pub auth_error: bool,
    pub last_checked_at: Option<Instant>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_error: None,
            last_error_at: None,
            consecutive_errors: 0,
            rate_limited: false,
            auth_error: false,
            last_checked_at: None,
        }
    }
}

struct HealthRecord {
    snapshot: RwLock<HealthSnapshot>,
    recovery_timeout: Duration,
}

/// A synthetic minimal request used to test whether an unhealthy service has
/// recovered. Registered per service id at construction time; the monitor
/// never fabricates its own probe behavior.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, service_id: &str) -> bool;
}

/// Explicit, constructor-injected health component — never a process-wide
/// lazily-initialized singleton. Held by `Arc` and shared by the balancer
/// and the orchestrator.
pub struct HealthMonitor {
    records: RwLock<HashMap<String, Arc<HealthRecord>>>,
    consecutive_error_threshold: u32,
    recovery_timeout: Duration,
    probing_enabled: bool,
    probe: Option<Arc<dyn Probe>>,
}

impl HealthMonitor {
    pub fn new(probing_enabled: bool, probe: Option<Arc<dyn Probe>>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            consecutive_error_threshold: DEFAULT_CONSECUTIVE_ERROR_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            probing_enabled,
            probe,
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.consecutive_error_threshold = threshold;
        self
    }

    /// Override the recovery timer, mainly so tests don't have to wait out
    /// the real five-minute default to exercise the probe path.
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    async fn record_for(&self, service_id: &str) -> Arc<HealthRecord> {
        if let Some(r) = self.records.read().await.get(service_id) {
            return r.clone();
        }
        let mut write = self.records.write().await;
        write
            .entry(service_id.to_string())
            .or_insert_with(|| {
                Arc::new(HealthRecord {
                    snapshot: RwLock::new(HealthSnapshot::default()),
                    recovery_timeout: self.recovery_timeout,
                })
            })
            .clone()
    }

    pub async fn report_rate_limit(&self, service_id: &str) {
        let record = self.record_for(service_id).await;
        let mut s = record.snapshot.write().await;
        s.status = HealthStatus::Unhealthy;
        s.rate_limited = true;
        s.consecutive_errors = 0;
        s.last_error = Some("rate_limited".to_string());
        s.last_error_at = Some(Instant::now());
    }

    pub async fn report_auth_error(&self, service_id: &str, status: u16) {
        let record = self.record_for(service_id).await;
        let mut s = record.snapshot.write().await;
        s.status = HealthStatus::Unhealthy;
        s.auth_error = true;
        s.last_error = Some(format!("auth_error({status})"));
        s.last_error_at = Some(Instant::now());
    }

    pub async fn report_error(&self, service_id: &str, err: impl Into<String>) {
        let record = self.record_for(service_id).await;
        let mut s = record.snapshot.write().await;
        s.consecutive_errors += 1;
        s.last_error = Some(err.into());
        s.last_error_at = Some(Instant::now());
        if s.consecutive_errors >= self.consecutive_error_threshold {
            s.status = HealthStatus::Unhealthy;
        }
    }

    pub async fn report_success(&self, service_id: &str) {
        let record = self.record_for(service_id).await;
        let mut s = record.snapshot.write().await;
        s.status = HealthStatus::Healthy;
        s.rate_limited = false;
        s.auth_error = false;
        s.consecutive_errors = 0;
        s.last_error = None;
        s.last_error_at = None;
    }

    /// Read path per §4.B: Healthy short-circuits true; otherwise consult
    /// the recovery timer and, if it has elapsed, the probe (if any).
    pub async fn is_healthy(&self, service_id: &str) -> bool {
        let record = self.record_for(service_id).await;
        {
            let s = record.snapshot.read().await;
            if s.status == HealthStatus::Healthy {
                return true;
            }
        }

        let elapsed_enough = {
            let s = record.snapshot.read().await;
            match s.last_error_at {
                Some(at) => Instant::now().duration_since(at) >= record.recovery_timeout,
                None => true,
            }
        };
        if !elapsed_enough {
            return false;
        }

        if !self.probing_enabled || self.probe.is_none() {
            // Auto-recover on timeout expiry when probing is off/unset.
            let mut s = record.snapshot.write().await;
            s.status = HealthStatus::Healthy;
            s.consecutive_errors = 0;
            s.rate_limited = false;
            s.auth_error = false;
            return true;
        }

        let probe = self.probe.as_ref().unwrap();
        let ok = probe.probe(service_id).await;
        let mut s = record.snapshot.write().await;
        s.last_checked_at = Some(Instant::now());
        if ok {
            s.status = HealthStatus::Healthy;
            s.consecutive_errors = 0;
            s.rate_limited = false;
            s.auth_error = false;
            true
        } else {
            s.last_error_at = Some(Instant::now());
            false
        }
    }

    pub async fn snapshot(&self, service_id: &str) -> HealthSnapshot {
        let record = self.record_for(service_id).await;
        record.snapshot.read().await.clone()
    }

    /// Every known service's current snapshot, for ambient reporting
    /// (`GET /metrics`). Does not consult the probe — a raw read, not an
    /// `is_healthy` recovery check.
    pub async fn snapshots(&self) -> HashMap<String, HealthSnapshot> {
        let records = self.records.read().await;
        let mut out = HashMap::with_capacity(records.len());
        for (id, record) in records.iter() {
            out.insert(id.clone(), record.snapshot.read().await.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFail;
    #[async_trait]
    impl Probe for AlwaysFail {
        async fn probe(&self, _service_id: &str) -> bool {
            false
        }
    }

    struct AlwaysSucceed;
    #[async_trait]
    impl Probe for AlwaysSucceed {
        async fn probe(&self, _service_id: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn unknown_service_defaults_healthy() {
        let monitor = HealthMonitor::new(true, None);
        assert!(monitor.is_healthy("svc-a").await);
    }

    #[tokio::test]
    async fn report_error_below_threshold_stays_healthy() {
        let monitor = HealthMonitor::new(true, None);
        monitor.report_error("svc-a", "boom").await;
        monitor.report_error("svc-a", "boom").await;
        assert!(monitor.is_healthy("svc-a").await);
    }

    #[tokio::test]
    async fn report_error_at_threshold_becomes_unhealthy() {
        let monitor = HealthMonitor::new(true, Some(Arc::new(AlwaysFail)));
        for _ in 0..3 {
            monitor.report_error("svc-a", "boom").await;
        }
        let s = monitor.snapshot("svc-a").await;
        assert_eq!(s.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn report_success_recovers_and_clears_flags() {
        let monitor = HealthMonitor::new(true, None);
        monitor.report_rate_limit("svc-a").await;
        assert_eq!(monitor.snapshot("svc-a").await.status, HealthStatus::Unhealthy);
        monitor.report_success("svc-a").await;
        let s = monitor.snapshot("svc-a").await;
        assert_eq!(s.status, HealthStatus::Healthy);
        assert!(!s.rate_limited);
        assert_eq!(s.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn rate_limit_cannot_recover_before_probe_or_success() {
        let monitor = HealthMonitor::new(true, Some(Arc::new(AlwaysFail)));
        monitor.report_rate_limit("svc-a").await;
        // Recovery timeout has not elapsed, and even once it has, the probe fails.
        assert!(!monitor.is_healthy("svc-a").await);
    }

    #[tokio::test]
    async fn auth_error_is_immediate_no_threshold() {
        let monitor = HealthMonitor::new(true, None);
        monitor.report_auth_error("svc-a", 401).await;
        let s = monitor.snapshot("svc-a").await;
        assert_eq!(s.status, HealthStatus::Unhealthy);
        assert!(s.auth_error);
    }

    #[tokio::test]
    async fn probe_success_recovers_after_timeout_elapses() {
        let monitor = HealthMonitor::new(true, Some(Arc::new(AlwaysSucceed)))
            .with_threshold(1)
            .with_recovery_timeout(Duration::from_millis(20));
        monitor.report_error("svc-a", "boom").await;
        assert_eq!(monitor.snapshot("svc-a").await.status, HealthStatus::Unhealthy);

        // Before the recovery timer elapses the probe is never consulted.
        assert!(!monitor.is_healthy("svc-a").await);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(monitor.is_healthy("svc-a").await);
        let s = monitor.snapshot("svc-a").await;
        assert_eq!(s.status, HealthStatus::Healthy);
        assert_eq!(s.consecutive_errors, 0);
        assert!(s.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn probe_failure_keeps_service_unhealthy_after_timeout_elapses() {
        let monitor = HealthMonitor::new(true, Some(Arc::new(AlwaysFail)))
            .with_threshold(1)
            .with_recovery_timeout(Duration::from_millis(20));
        monitor.report_error("svc-a", "boom").await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!monitor.is_healthy("svc-a").await);
        let s = monitor.snapshot("svc-a").await;
        assert_eq!(s.status, HealthStatus::Unhealthy);
    }
}
