use std::net::SocketAddr;
use thiserror::Error;

use crate::dns::WireError;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Configuration validation errors, one variant per environment variable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen host: {0}")]
    InvalidListenHost(String),
    #[error("invalid listen port: {0}")]
    InvalidListenPort(String),
    #[error("invalid upstream URL: {0}")]
    InvalidUpstreamUrl(String),
    #[error("no upstream URLs configured")]
    NoUpstreams,
    #[error("invalid bootstrap DNS address: {0}")]
    InvalidBootstrapAddress(String),
    #[error("invalid worker count: {0}")]
    InvalidWorkerCount(String),
    #[error("invalid queue size: {0}")]
    InvalidQueueSize(String),
    #[error("invalid cache flag: {0}")]
    InvalidCacheFlag(String),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

/// Failure of a single upstream DoH exchange.
///
/// Every variant except `NoUpstreamAvailable` is recorded against the
/// endpoint that produced it.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no upstream endpoint available")]
    NoUpstreamAvailable,
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream returned HTTP {0}")]
    Http(reqwest::StatusCode),
    #[error("upstream transport error: {0}")]
    Transport(reqwest::Error),
    #[error("upstream body was not a DNS message: {0}")]
    Decode(#[from] WireError),
}

/// Startup-time bootstrap lookup failure. Always fail-open: the caller logs
/// a warning and leaves the endpoint to the system resolver.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("lookup timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Fatal errors surfaced to the binary; all of these abort startup.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to build HTTPS client: {0}")]
    HttpClient(reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
