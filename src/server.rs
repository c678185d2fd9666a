use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::bootstrap;
use crate::cache::ResponseCache;
use crate::config::ProxyConfig;
use crate::dns;
use crate::error::{ProxyError, ResolveError};
use crate::protocol::{self, Job};
use crate::resolver::DohResolver;
use crate::upstream::{UpstreamEndpoint, UpstreamManager};

/// How often expired cache entries are swept out.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
/// How often the one-line operational summary is logged.
const STATS_INTERVAL: Duration = Duration::from_secs(300);
/// How long shutdown waits for queued jobs to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters the stats reporter reads. Hot-path increments are relaxed.
#[derive(Debug, Default)]
pub struct ServerStats {
    queries_received: AtomicU64,
    malformed_packets: AtomicU64,
    queue_full_drops: AtomicU64,
    failed_resolutions: AtomicU64,
}

impl ServerStats {
    pub fn record_query(&self) {
        self.queries_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full_drop(&self) {
        self.queue_full_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_resolution(&self) {
        self.failed_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queries_received(&self) -> u64 {
        self.queries_received.load(Ordering::Relaxed)
    }

    pub fn malformed_packets(&self) -> u64 {
        self.malformed_packets.load(Ordering::Relaxed)
    }

    pub fn queue_full_drops(&self) -> u64 {
        self.queue_full_drops.load(Ordering::Relaxed)
    }

    pub fn failed_resolutions(&self) -> u64 {
        self.failed_resolutions.load(Ordering::Relaxed)
    }
}

/// The assembled proxy: UDP socket, bounded job queue, worker pool, cache
/// and upstream pool.
pub struct ProxyServer {
    config: ProxyConfig,
    socket: Arc<UdpSocket>,
    cache: Arc<ResponseCache>,
    upstreams: Arc<UpstreamManager>,
    resolver: Arc<DohResolver>,
    stats: Arc<ServerStats>,
}

impl ProxyServer {
    /// Bootstrap the upstream list, build the shared HTTPS client and bind
    /// the UDP socket. A bind failure here is fatal to startup.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        let mut endpoints = Vec::with_capacity(config.upstream_urls.len());
        let mut client_builder = Client::builder().pool_idle_timeout(None);
        for url in &config.upstream_urls {
            let addr = bootstrap::bootstrap_endpoint(url, config.bootstrap_dns).await;
            if let (Some(addr), Some(host)) = (addr, url.host_str()) {
                // Pin the bootstrapped address for this host; the URL (and
                // with it SNI and certificate verification) keeps the
                // original hostname.
                let port = url.port_or_known_default().unwrap_or(443);
                client_builder = client_builder.resolve(host, SocketAddr::new(addr, port));
            }
            endpoints.push(UpstreamEndpoint::new(url.clone(), addr));
        }
        let client = client_builder.build().map_err(ProxyError::HttpClient)?;

        let upstreams = Arc::new(UpstreamManager::new(endpoints));
        let resolver = Arc::new(DohResolver::new(client, upstreams.clone()));
        let cache = Arc::new(ResponseCache::new(config.cache_enabled));

        let socket = UdpSocket::bind(config.listen_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;
        info!(
            addr = %local_addr,
            upstreams = upstreams.len(),
            workers = config.worker_count,
            queue = config.queue_size,
            cache = config.cache_enabled,
            "proxy listening"
        );

        Ok(Self {
            config,
            socket: Arc::new(socket),
            cache,
            upstreams,
            resolver,
            stats: Arc::new(ServerStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn upstreams(&self) -> &Arc<UpstreamManager> {
        &self.upstreams
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Run the receive loop, workers and maintenance tasks until `shutdown`
    /// fires, then drain queued jobs within the drain budget.
    pub async fn run(self: Arc<Self>, shutdown: &broadcast::Sender<()>) {
        let (queue_tx, queue_rx) = mpsc::channel::<Job>(self.config.queue_size);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let maintenance = vec![
            tokio::spawn(cache_cleaner(self.cache.clone(), shutdown.subscribe())),
            tokio::spawn(stats_reporter(
                self.cache.clone(),
                self.upstreams.clone(),
                self.stats.clone(),
                shutdown.subscribe(),
            )),
        ];

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for id in 0..self.config.worker_count {
            let server = self.clone();
            let queue_rx = queue_rx.clone();
            workers.push(tokio::spawn(async move {
                server.worker_loop(id, queue_rx).await;
            }));
        }

        protocol::receive_loop(
            self.socket.clone(),
            queue_tx,
            self.stats.clone(),
            shutdown.subscribe(),
        )
        .await;
        // The sender is gone now; the closed queue drains the workers.

        let aborts: Vec<_> = workers.iter().map(|worker| worker.abort_handle()).collect();
        if timeout(DRAIN_TIMEOUT, join_all(workers)).await.is_err() {
            warn!("queue drain timed out, aborting workers");
            for handle in aborts {
                handle.abort();
            }
        }
        for task in maintenance {
            task.abort();
        }
        info!("shutdown complete");
    }

    async fn worker_loop(&self, id: usize, queue: Arc<Mutex<mpsc::Receiver<Job>>>) {
        debug!(worker = id, "worker started");
        loop {
            // Serialize dequeues only; the guard is gone before the job runs.
            let job = { queue.lock().await.recv().await };
            let Some(job) = job else { break };
            self.handle_job(job).await;
        }
        debug!(worker = id, "worker stopped");
    }

    async fn handle_job(&self, job: Job) {
        let (txid, question) = match dns::parse_query(&job.packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.record_malformed();
                debug!(client = %job.client_addr, error = %e, "dropping malformed packet");
                return;
            }
        };

        if let Some((cached, _remaining)) = self.cache.lookup(&question) {
            let response = dns::with_txid(&cached, txid);
            protocol::send_response(&self.socket, job.client_addr, &response).await;
            trace!(
                name = %question.name,
                elapsed = ?job.received_at.elapsed(),
                "served from cache"
            );
            return;
        }

        match self.resolver.resolve(&job.packet).await {
            Ok((body, ttl)) => {
                debug!(
                    name = %question.name,
                    ttl,
                    elapsed = ?job.received_at.elapsed(),
                    "resolved via upstream"
                );
                self.cache.insert(question, body.clone(), ttl);
                let response = dns::with_txid(&body, txid);
                protocol::send_response(&self.socket, job.client_addr, &response).await;
            }
            Err(ResolveError::NoUpstreamAvailable) => {
                self.stats.record_failed_resolution();
                error!("no upstream endpoint available, dropping query");
            }
            Err(e) => {
                // The client sees a timeout; we never synthesize SERVFAIL.
                self.stats.record_failed_resolution();
                warn!(name = %question.name, error = %e, "upstream resolution failed, dropping query");
            }
        }
    }
}

async fn cache_cleaner(cache: Arc<ResponseCache>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                cache.prune();
            }
        }
    }
}

async fn stats_reporter(
    cache: Arc<ResponseCache>,
    upstreams: Arc<UpstreamManager>,
    stats: Arc<ServerStats>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(STATS_INTERVAL);
    // The first tick fires immediately and would log an all-zero line.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                info!(
                    cache_size = cache.size(),
                    hit_rate = cache.stats().hit_rate(),
                    queries = stats.queries_received(),
                    malformed = stats.malformed_packets(),
                    queue_drops = stats.queue_full_drops(),
                    failed = stats.failed_resolutions(),
                    "periodic stats"
                );
                for endpoint in upstreams.stats_snapshot() {
                    info!(
                        url = %endpoint.url,
                        healthy = endpoint.healthy,
                        successes = endpoint.successes,
                        failures = endpoint.failures,
                        avg_response_ms = ?endpoint.avg_response_ms,
                        "upstream health"
                    );
                }
            }
        }
    }
}
