use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Url;
use tracing::{info, warn};

/// Consecutive failures before an endpoint leaves rotation.
pub const FAILURE_THRESHOLD: u32 = 3;
/// How long a failed endpoint sits out before selection probes it again.
pub const RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// One upstream DoH endpoint plus its health ledger.
///
/// The URL authority is never rewritten; a bootstrap-resolved address, when
/// present, is pinned on the shared HTTPS client instead so SNI and
/// certificate verification keep the original hostname.
#[derive(Debug)]
pub struct UpstreamEndpoint {
    url: Url,
    bootstrap_addr: Option<IpAddr>,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
    healthy: AtomicBool,
    last_failure: Mutex<Option<Instant>>,
    avg_response_ms: Mutex<Option<f64>>,
}

impl UpstreamEndpoint {
    pub fn new(url: Url, bootstrap_addr: Option<IpAddr>) -> Self {
        Self {
            url,
            bootstrap_addr,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            last_failure: Mutex::new(None),
            avg_response_ms: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn bootstrap_addr(&self) -> Option<IpAddr> {
        self.bootstrap_addr
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Whether selection may hand this endpoint out right now: healthy, or
    /// cooled down long enough to be silently re-admitted.
    fn is_available(&self, recovery_interval: Duration) -> bool {
        if self.healthy.load(Ordering::Relaxed) {
            return true;
        }
        match *self.last_failure.lock() {
            Some(at) => at.elapsed() >= recovery_interval,
            None => true,
        }
    }

    fn record_success(&self, elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);

        let sample = elapsed.as_secs_f64() * 1000.0;
        let mut avg = self.avg_response_ms.lock();
        *avg = Some(match *avg {
            Some(current) => current * 0.8 + sample * 0.2,
            None => sample,
        });
    }

    /// Returns the new consecutive-failure count.
    fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Point-in-time summary of one endpoint for the periodic report.
#[derive(Debug, Clone)]
pub struct UpstreamStats {
    pub url: String,
    pub healthy: bool,
    pub successes: u64,
    pub failures: u64,
    pub avg_response_ms: Option<f64>,
}

/// Ordered pool of upstream endpoints with round-robin selection and
/// failure-threshold health tracking.
#[derive(Debug)]
pub struct UpstreamManager {
    endpoints: Vec<Arc<UpstreamEndpoint>>,
    next: AtomicUsize,
    failure_threshold: u32,
    recovery_interval: Duration,
}

impl UpstreamManager {
    pub fn new(endpoints: Vec<UpstreamEndpoint>) -> Self {
        Self::with_policy(endpoints, FAILURE_THRESHOLD, RECOVERY_INTERVAL)
    }

    pub fn with_policy(
        endpoints: Vec<UpstreamEndpoint>,
        failure_threshold: u32,
        recovery_interval: Duration,
    ) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            next: AtomicUsize::new(0),
            failure_threshold,
            recovery_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Arc<UpstreamEndpoint>] {
        &self.endpoints
    }

    /// Next endpoint in rotation, skipping the ones currently out.
    ///
    /// The rotation index advances exactly once per call; the availability
    /// filter runs after indexing. When nothing is available the endpoint
    /// that failed longest ago is returned as a best-effort fallback, so
    /// `None` only means the pool is empty.
    pub fn select(&self) -> Option<Arc<UpstreamEndpoint>> {
        let count = self.endpoints.len();
        if count == 0 {
            return None;
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for probe in 0..count {
            let endpoint = &self.endpoints[start.wrapping_add(probe) % count];
            if endpoint.is_available(self.recovery_interval) {
                return Some(endpoint.clone());
            }
        }

        self.endpoints
            .iter()
            .min_by_key(|endpoint| *endpoint.last_failure.lock())
            .cloned()
    }

    pub fn record_success(&self, endpoint: &UpstreamEndpoint, elapsed: Duration) {
        let was_unhealthy = !endpoint.is_healthy();
        endpoint.record_success(elapsed);
        if was_unhealthy {
            info!(url = %endpoint.url, "upstream endpoint recovered");
        }
    }

    pub fn record_failure(&self, endpoint: &UpstreamEndpoint) {
        let consecutive = endpoint.record_failure();
        if consecutive >= self.failure_threshold && endpoint.healthy.swap(false, Ordering::Relaxed)
        {
            warn!(
                url = %endpoint.url,
                consecutive,
                "upstream endpoint marked unhealthy"
            );
        }
    }

    pub fn stats_snapshot(&self) -> Vec<UpstreamStats> {
        self.endpoints
            .iter()
            .map(|endpoint| UpstreamStats {
                url: endpoint.url.to_string(),
                healthy: endpoint.is_healthy(),
                successes: endpoint.successes.load(Ordering::Relaxed),
                failures: endpoint.failures.load(Ordering::Relaxed),
                avg_response_ms: *endpoint.avg_response_ms.lock(),
            })
            .collect()
    }
}
