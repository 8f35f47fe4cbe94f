//! In-memory upstream feed cache.
//!
//! Entries are keyed by source URL and carry the parsed document, the
//! validators the upstream handed out (`ETag` / `Last-Modified`), and a TTL.
//! Expired entries are deliberately kept around: the fetcher uses them both
//! for conditional revalidation and as a stale fallback when the upstream
//! is unreachable. Eviction is LRU once the store reaches capacity.
use crate::feed::FeedDocument;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Upstream cache validators captured from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validator {
    /// True when the upstream offered no validator at all.
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A cached upstream feed together with its revalidation state.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Parsed document, shared with in-flight responses.
    pub document: Arc<FeedDocument>,
    /// Validators to present on the next conditional request.
    pub validator: Validator,
    /// When the entry was stored or last revalidated.
    pub fetched_at: Instant,
    /// How long the entry counts as fresh.
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(document: Arc<FeedDocument>, validator: Validator, ttl: Duration) -> Self {
        Self {
            document,
            validator,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// Whether the entry's TTL has elapsed. A zero TTL is expired immediately,
    /// which turns every request into a conditional revalidation.
    pub fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// Thread-safe LRU store of [`CacheEntry`] values keyed by source URL.
#[derive(Debug)]
pub struct CacheStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl CacheStore {
    /// Create a store holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up an entry, promoting it to most recently used.
    ///
    /// Expired entries are returned as well; callers decide whether to
    /// revalidate. Returns a clone so the lock is never held across awaits.
    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        self.lock().get(url).cloned()
    }

    /// Insert or replace the entry for `url`, evicting the least recently
    /// used entry if the store is full.
    pub fn put(&self, url: String, entry: CacheEntry) {
        self.lock().put(url, entry);
    }

    /// Drop the entry for `url`, returning it if one was stored.
    pub fn invalidate(&self, url: &str) -> Option<CacheEntry> {
        self.lock().pop(url)
    }

    /// Number of entries currently stored, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Acquire the inner lock, recovering from poisoning. A panic while the
    /// lock was held can at worst leave a stale or missing entry, which the
    /// fetch path already tolerates.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("feed cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
