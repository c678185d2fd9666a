use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::cache::{MAX_TTL_SECS, MIN_TTL_SECS};
use crate::dns;
use crate::error::ResolveError;
use crate::upstream::{UpstreamEndpoint, UpstreamManager};

/// Media type for RFC 8484 DNS messages.
pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";
/// Deadline for a single upstream exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// TTL applied when a response carries no answer records.
const EMPTY_ANSWER_TTL: u32 = 60;

/// Resolves wire-format queries through upstream DoH endpoints.
///
/// One resolver, wrapping one pooled HTTP/2 client, is shared by all
/// workers for the lifetime of the process.
pub struct DohResolver {
    client: Client,
    upstreams: Arc<UpstreamManager>,
}

impl DohResolver {
    pub fn new(client: Client, upstreams: Arc<UpstreamManager>) -> Self {
        Self { client, upstreams }
    }

    pub fn upstreams(&self) -> &Arc<UpstreamManager> {
        &self.upstreams
    }

    /// One DoH exchange: pick an endpoint, POST the wire query, normalize
    /// the answer TTL. Health is recorded against the endpoint either way.
    ///
    /// There is no retry across endpoints here; the caller owns that policy.
    pub async fn resolve(&self, query: &[u8]) -> Result<(Bytes, u32), ResolveError> {
        let endpoint = self
            .upstreams
            .select()
            .ok_or(ResolveError::NoUpstreamAvailable)?;

        let started = Instant::now();
        match self.exchange(&endpoint, query).await {
            Ok((body, ttl)) => {
                let elapsed = started.elapsed();
                self.upstreams.record_success(&endpoint, elapsed);
                debug!(
                    url = %endpoint.url(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    ttl,
                    "upstream exchange complete"
                );
                Ok((body, ttl))
            }
            Err(e) => {
                self.upstreams.record_failure(&endpoint);
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        endpoint: &UpstreamEndpoint,
        query: &[u8],
    ) -> Result<(Bytes, u32), ResolveError> {
        let response = self
            .client
            .post(endpoint.url().clone())
            .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .timeout(REQUEST_TIMEOUT)
            .body(query.to_vec())
            .send()
            .await
            .map_err(into_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Http(status));
        }

        let body = response.bytes().await.map_err(into_transport_error)?;
        let ttl = dns::min_answer_ttl(&body)?
            .unwrap_or(EMPTY_ANSWER_TTL)
            .clamp(MIN_TTL_SECS, MAX_TTL_SECS);
        Ok((body, ttl))
    }
}

fn into_transport_error(e: reqwest::Error) -> ResolveError {
    if e.is_timeout() {
        ResolveError::Timeout
    } else {
        ResolveError::Transport(e)
    }
}
