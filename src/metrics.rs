//! Process-wide request and cache counters.
//!
//! A single [`Metrics`] instance is shared by the fetch and serving layers;
//! the HTTP layer exposes a JSON snapshot of it on `/metrics`. Counters are
//! monotonic for the lifetime of the process.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters covering the request path end to end.
///
/// Increments use relaxed ordering: the counters are independent and are only
/// ever read as a point-in-time snapshot, so no cross-counter ordering is
/// required.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Every request that reached the serving layer.
    requests_total: AtomicU64,
    /// Requests answered with a full feed body.
    requests_success: AtomicU64,
    /// Requests answered 304 from a matching client validator.
    requests_not_modified: AtomicU64,
    /// Requests refused because the client's token bucket was empty.
    requests_rate_limited: AtomicU64,
    /// Requests that ended in an error response.
    requests_error: AtomicU64,
    /// Requests served from a fresh cache entry without touching upstream.
    cache_hits: AtomicU64,
    /// Upstream requests issued (no entry, or entry past its TTL).
    cache_misses: AtomicU64,
    /// Upstream revalidations answered 304 Not Modified.
    upstream_not_modified: AtomicU64,
    /// Responses built from an expired entry after an upstream failure.
    stale_served: AtomicU64,
    /// Filter passes executed over a feed document.
    filters_applied: AtomicU64,
    /// Items dropped across all filter passes.
    items_removed: AtomicU64,
}

impl Metrics {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_modified(&self) {
        self.requests_not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.requests_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_not_modified(&self) {
        self.upstream_not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one filter pass that removed `removed` items.
    pub fn record_filter(&self, removed: u64) {
        self.filters_applied.fetch_add(1, Ordering::Relaxed);
        self.items_removed.fetch_add(removed, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_not_modified: self.requests_not_modified.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            requests_error: self.requests_error.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream_not_modified: self.upstream_not_modified.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            filters_applied: self.filters_applied.load(Ordering::Relaxed),
            items_removed: self.items_removed.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`Metrics`], rendered as JSON by `/metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_not_modified: u64,
    pub requests_rate_limited: u64,
    pub requests_error: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream_not_modified: u64,
    pub stale_served: u64,
    pub filters_applied: u64,
    pub items_removed: u64,
}

// ============================================================================
// Tests
// ============================================================================
