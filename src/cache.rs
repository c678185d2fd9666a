use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::dns::QuestionKey;

/// Shortest TTL an entry is kept for.
pub const MIN_TTL_SECS: u32 = 1;
/// Longest TTL an entry is kept for.
pub const MAX_TTL_SECS: u32 = 3600;

#[derive(Debug)]
struct CacheEntry {
    response: Bytes,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired_evictions: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expired_evictions(&self, count: u64) {
        self.expired_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn expired_evictions(&self) -> u64 {
        self.expired_evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// TTL-indexed response cache keyed on the question fingerprint.
///
/// Stored bytes are the upstream response verbatim; callers rewrite the
/// transaction id on their own copy. Replacement is last-writer-wins and
/// size is unbounded modulo TTL pruning.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<QuestionKey, CacheEntry>,
    enabled: bool,
    stats: CacheStats,
}

impl ResponseCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            enabled,
            stats: CacheStats::default(),
        }
    }

    /// Cached response and remaining TTL in seconds, never expired and never
    /// zero. Reports a miss whenever the cache is disabled.
    pub fn lookup(&self, key: &QuestionKey) -> Option<(Bytes, u32)> {
        if !self.enabled {
            return None;
        }

        if let Some(entry) = self.entries.get(key) {
            let now = Instant::now();
            if entry.expires_at > now {
                let remaining = entry.expires_at.duration_since(now).as_secs().max(1) as u32;
                self.stats.record_hit();
                trace!(name = %key.name, remaining, "cache hit");
                return Some((entry.response.clone(), remaining));
            }
            drop(entry);
            self.entries.remove(key);
            self.stats.record_expired_evictions(1);
        }

        self.stats.record_miss();
        trace!(name = %key.name, "cache miss");
        None
    }

    /// Store a response, clamping the TTL into [1, 3600] seconds and
    /// replacing any prior entry for the same question. No-op when disabled.
    pub fn insert(&self, key: QuestionKey, response: Bytes, ttl_secs: u32) {
        if !self.enabled {
            return;
        }

        let ttl = ttl_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS);
        debug!(name = %key.name, ttl, "caching response");
        self.entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: Instant::now() + Duration::from_secs(u64::from(ttl)),
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats.record_expired_evictions(removed as u64);
            debug!(removed, remaining = self.entries.len(), "pruned cache");
        }
        removed
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
