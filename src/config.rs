use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use reqwest::Url;
use tracing::Level;

use crate::error::ConfigError;

/// Runtime configuration, sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the UDP listener binds to
    pub listen_addr: SocketAddr,

    /// Upstream DoH endpoints, rotated round-robin
    pub upstream_urls: Vec<Url>,

    /// Plain-UDP resolver used to bootstrap hostname-based DoH URLs
    pub bootstrap_dns: Ipv4Addr,

    /// Worker pool size
    pub worker_count: usize,

    /// Bounded job queue capacity; datagrams past it are dropped
    pub queue_size: usize,

    /// Whether the response cache is active
    pub cache_enabled: bool,

    /// Default log level when RUST_LOG is not set
    pub log_level: Level,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5053),
            upstream_urls: vec![
                Url::parse("https://cloudflare-dns.com/dns-query")
                    .expect("default upstream URL is valid"),
            ],
            bootstrap_dns: Ipv4Addr::new(8, 8, 8, 8),
            worker_count: 10,
            queue_size: 1000,
            cache_enabled: true,
            log_level: Level::INFO,
        }
    }
}

impl ProxyConfig {
    /// Build a config from environment variables, starting from defaults.
    /// Returns Err if any variable that is set fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let mut host = config.listen_addr.ip();
        let mut port = config.listen_addr.port();
        if let Ok(value) = std::env::var("LISTEN_HOST") {
            host = value
                .parse()
                .map_err(|_| ConfigError::InvalidListenHost(value))?;
        }
        if let Ok(value) = std::env::var("LISTEN_PORT") {
            port = value
                .parse()
                .map_err(|_| ConfigError::InvalidListenPort(value))?;
        }
        config.listen_addr = SocketAddr::new(host, port);

        if let Ok(value) = std::env::var("DOH_UPSTREAM") {
            let urls: Result<Vec<Url>, ConfigError> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_upstream_url)
                .collect();
            let urls = urls?;
            if urls.is_empty() {
                return Err(ConfigError::NoUpstreams);
            }
            config.upstream_urls = urls;
        }

        if let Ok(value) = std::env::var("BOOTSTRAP_DNS") {
            config.bootstrap_dns = value
                .parse()
                .map_err(|_| ConfigError::InvalidBootstrapAddress(value))?;
        }

        if let Ok(value) = std::env::var("WORKER_COUNT") {
            config.worker_count = match value.parse() {
                Ok(count) if count > 0 => count,
                _ => return Err(ConfigError::InvalidWorkerCount(value)),
            };
        }

        if let Ok(value) = std::env::var("QUEUE_SIZE") {
            config.queue_size = match value.parse() {
                Ok(size) if size > 0 => size,
                _ => return Err(ConfigError::InvalidQueueSize(value)),
            };
        }

        if let Ok(value) = std::env::var("CACHE_ENABLED") {
            config.cache_enabled =
                parse_bool(&value).ok_or_else(|| ConfigError::InvalidCacheFlag(value))?;
        }

        if let Ok(value) = std::env::var("LOG_LEVEL") {
            config.log_level = parse_log_level(&value)?;
        }

        Ok(config)
    }
}

fn parse_upstream_url(value: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(value).map_err(|_| ConfigError::InvalidUpstreamUrl(value.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUpstreamUrl(value.to_string()));
    }
    Ok(url)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_log_level(value: &str) -> Result<Level, ConfigError> {
    match value.to_ascii_uppercase().as_str() {
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARNING" | "WARN" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(ConfigError::InvalidLogLevel(value.to_string())),
    }
}
