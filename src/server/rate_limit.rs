//! Per-client token bucket rate limiting.
//!
//! Each (feed, client address) pair gets its own bucket. A bucket starts
//! full, costs one token per request, and accrues tokens continuously at a
//! rate of one per configured refill interval, capped at capacity. Refill is
//! computed lazily on access, so idle buckets cost nothing until pruned.
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Credit tokens accrued since the last refill, capped at capacity.
    fn refill(&mut self, now: Instant, capacity: u32, refill_interval: Duration) {
        if refill_interval.is_zero() {
            self.tokens = f64::from(capacity);
            self.last_refill = now;
            return;
        }
        let elapsed = now.duration_since(self.last_refill);
        let accrued = elapsed.as_secs_f64() / refill_interval.as_secs_f64();
        if accrued > 0.0 {
            self.tokens = (self.tokens + accrued).min(f64::from(capacity));
            self.last_refill = now;
        }
    }

    /// How long until a whole token is available. Only meaningful when the
    /// bucket holds less than one token.
    fn time_to_next_token(&self, refill_interval: Duration) -> Duration {
        let deficit = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(deficit * refill_interval.as_secs_f64())
    }
}

/// Concurrent map of token buckets keyed by feed and client address.
///
/// Capacity and refill interval are passed per call rather than stored,
/// since each feed can override the global limits.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<(String, IpAddr), Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token from the bucket for `feed_id` / `client`.
    ///
    /// Returns `Err` with the duration until the next token accrues when the
    /// bucket is empty. The request is not queued; callers turn the duration
    /// into a `Retry-After` hint.
    pub fn try_acquire(
        &self,
        feed_id: &str,
        client: IpAddr,
        capacity: u32,
        refill_interval: Duration,
    ) -> Result<(), Duration> {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((feed_id.to_string(), client))
            .or_insert_with(|| Bucket::full(capacity, now));
        bucket.refill(now, capacity, refill_interval);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(bucket.time_to_next_token(refill_interval))
        }
    }

    /// Drop buckets that have not been touched for `max_idle`. Returns the
    /// number of buckets removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < max_idle);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
