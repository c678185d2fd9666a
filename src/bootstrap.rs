//! Startup-time resolution of DoH endpoint hostnames over plain UDP.
//!
//! When this proxy is the host's only resolver, the HTTPS client cannot look
//! up its own upstream's hostname through it. A one-shot A query against a
//! known public resolver on port 53 breaks that cycle. Every failure is
//! fail-open: the endpoint falls back to the system resolver.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use reqwest::Url;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::dns;
use crate::error::BootstrapError;

/// How long to wait for the bootstrap resolver's answer.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve the host of `url` via `bootstrap_dns`, if it needs resolving.
///
/// IP-literal URLs return `None` without any network traffic; so do lookup
/// failures, after a warning.
pub async fn bootstrap_endpoint(url: &Url, bootstrap_dns: Ipv4Addr) -> Option<IpAddr> {
    let host = url.host_str()?;
    // IPv6 literals keep their brackets in host_str.
    if host.parse::<Ipv4Addr>().is_ok() || host.starts_with('[') {
        return None;
    }

    let server = SocketAddr::new(IpAddr::V4(bootstrap_dns), 53);
    match resolve_host(host, server, BOOTSTRAP_TIMEOUT).await {
        Ok(addr) => {
            debug!(%host, %addr, "bootstrapped DoH endpoint");
            Some(IpAddr::V4(addr))
        }
        Err(e) => {
            warn!(
                %host,
                %server,
                error = %e,
                "bootstrap lookup failed, falling back to system resolver"
            );
            None
        }
    }
}

/// Single UDP exchange with `server` asking for an A record of `host`.
pub async fn resolve_host(
    host: &str,
    server: SocketAddr,
    wait: Duration,
) -> Result<Ipv4Addr, BootstrapError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(server).await?;

    let txid = rand::random::<u16>();
    let query = dns::build_query(txid, host, dns::QTYPE_A);
    socket.send(&query).await?;

    let mut buf = [0u8; 512];
    let len = timeout(wait, socket.recv(&mut buf))
        .await
        .map_err(|_| BootstrapError::Timeout)??;

    Ok(dns::first_a_record(&buf[..len], txid)?)
}
