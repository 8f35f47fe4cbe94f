//! Request orchestration for served feeds.
//!
//! [`FeedService`] ties the layers together: look up the feed profile, charge
//! the client's token bucket, resolve the upstream document through the
//! fetcher, filter and mark it, and answer downstream conditional requests
//! from the rendered representation's ETag.
//!
//! Rendered output is cached per feed keyed by the upstream document's
//! digest, so a feed is re-filtered only when the upstream content actually
//! changes, not on every request.
use crate::config::{Config, ConfigError, FeedProfile};
use crate::feed::{filter, transform, FeedDocument};
use crate::fetch::{CacheStore, FetchFailure, Fetcher};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::server::rate_limit::RateLimiter;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A rendered feed body ready to be served.
#[derive(Debug)]
pub struct FeedResponse {
    pub body: Bytes,
    /// Strong validator over the rendered bytes, quoted hex SHA-256.
    pub etag: String,
    /// True when the body came from an expired cache entry because the
    /// upstream could not be reached.
    pub served_stale: bool,
}

/// Outcome of one request against a served feed.
#[derive(Debug)]
pub enum ServeResult {
    /// Full response body.
    Fresh(FeedResponse),
    /// The client's validator matches the current representation.
    NotModified { etag: String },
    /// The client's token bucket is empty.
    RateLimited { retry_after: Duration },
    /// No feed with the requested identifier is configured.
    UnknownFeed,
    /// The upstream could not produce a document and no fallback existed.
    Upstream(FetchFailure),
}

/// Filtered output cached per feed, keyed by the source document digest.
#[derive(Debug, Clone)]
struct RenderedFeed {
    source_digest: String,
    body: Bytes,
    etag: String,
}

pub struct FeedService {
    profiles: HashMap<String, FeedProfile>,
    fetcher: Fetcher,
    cache: Arc<CacheStore>,
    limiter: RateLimiter,
    metrics: Arc<Metrics>,
    rendered: Mutex<HashMap<String, RenderedFeed>>,
}

impl FeedService {
    /// Build the service from configuration, compiling all feed profiles.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Feed`] when any feed definition is invalid.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let profiles = config.profiles()?;
        let metrics = Arc::new(Metrics::default());
        let cache = Arc::new(CacheStore::new(config.cache.max_entries));
        let fetcher = Fetcher::new(
            cache.clone(),
            metrics.clone(),
            config.request_timeout(),
            config.max_payload_bytes(),
        );
        Ok(Self {
            profiles,
            fetcher,
            cache,
            limiter: RateLimiter::new(),
            metrics,
            rendered: Mutex::new(HashMap::new()),
        })
    }

    /// Serve one request for `feed_id` on behalf of `client`.
    ///
    /// `if_none_match` is the raw downstream `If-None-Match` header, if any.
    /// Rate limiting happens before any upstream work, so refused requests
    /// cost nothing upstream.
    pub async fn serve(
        &self,
        feed_id: &str,
        client: IpAddr,
        if_none_match: Option<&str>,
    ) -> ServeResult {
        self.metrics.record_request();

        let Some(profile) = self.profiles.get(feed_id) else {
            self.metrics.record_error();
            tracing::debug!(feed_id, "request for unknown feed");
            return ServeResult::UnknownFeed;
        };

        if let Err(retry_after) = self.limiter.try_acquire(
            feed_id,
            client,
            profile.rate_capacity,
            profile.refill_interval,
        ) {
            self.metrics.record_rate_limited();
            tracing::warn!(feed_id, client = %client, "rate limit exceeded");
            return ServeResult::RateLimited { retry_after };
        }

        let outcome = match self
            .fetcher
            .fetch(&profile.source_url, profile.ttl, &profile.user_agent)
            .await
        {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.metrics.record_error();
                tracing::error!(feed_id, error = %failure, "failed to resolve upstream feed");
                return ServeResult::Upstream(failure);
            }
        };

        let rendered = self.render(feed_id, profile, &outcome.document);

        if let Some(header) = if_none_match {
            if etag_matches(header, &rendered.etag) {
                self.metrics.record_not_modified();
                return ServeResult::NotModified {
                    etag: rendered.etag,
                };
            }
        }

        self.metrics.record_success();
        ServeResult::Fresh(FeedResponse {
            body: rendered.body,
            etag: rendered.etag,
            served_stale: outcome.served_stale,
        })
    }

    /// Filter and mark `document`, reusing the cached rendering when the
    /// upstream content is unchanged.
    fn render(
        &self,
        feed_id: &str,
        profile: &FeedProfile,
        document: &Arc<FeedDocument>,
    ) -> RenderedFeed {
        let digest = document.source_digest();
        {
            let cache = self.rendered_lock();
            if let Some(existing) = cache.get(feed_id) {
                if existing.source_digest == digest {
                    return existing.clone();
                }
            }
        }

        // Render outside the lock. Two concurrent renders of the same input
        // produce identical bytes, so last-write-wins is harmless.
        let mut filtered = FeedDocument::clone(document);
        let removed = filter::apply(&mut filtered, &profile.rule);
        transform::mark_filtered(&mut filtered, &profile.source_url, &profile.disclosure_template);
        let xml = filtered.to_xml();
        self.metrics.record_filter(removed as u64);

        let rendered = RenderedFeed {
            source_digest: digest.to_string(),
            etag: format!("\"{:x}\"", Sha256::digest(xml.as_bytes())),
            body: Bytes::from(xml),
        };
        tracing::info!(
            feed_id,
            removed,
            bytes = rendered.body.len(),
            "rendered filtered feed"
        );

        self.rendered_lock()
            .insert(feed_id.to_string(), rendered.clone());
        rendered
    }

    fn rendered_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RenderedFeed>> {
        self.rendered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of upstream feeds currently cached.
    pub fn cached_feeds(&self) -> usize {
        self.cache.len()
    }

    /// Number of configured feeds.
    pub fn feed_count(&self) -> usize {
        self.profiles.len()
    }

    /// Drop rate limit buckets idle for longer than `max_idle`.
    pub fn prune_rate_buckets(&self, max_idle: Duration) -> usize {
        self.limiter.prune_idle(max_idle)
    }
}

/// Compare a raw `If-None-Match` header against the current ETag.
///
/// Handles comma-separated lists, the `*` wildcard, and weak validators
/// (`W/` prefixed) by comparing their opaque part.
fn etag_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_exact_match() {
        assert!(etag_matches("\"abc\"", "\"abc\""));
        assert!(!etag_matches("\"abc\"", "\"def\""));
    }

    #[test]
    fn test_etag_list_match() {
        assert!(etag_matches("\"one\", \"two\", \"three\"", "\"two\""));
        assert!(!etag_matches("\"one\", \"two\"", "\"four\""));
    }

    #[test]
    fn test_etag_weak_validator_matches_opaque_part() {
        assert!(etag_matches("W/\"abc\"", "\"abc\""));
    }

    #[test]
    fn test_etag_wildcard_matches_anything() {
        assert!(etag_matches("*", "\"whatever\""));
    }

    #[tokio::test]
    async fn test_unknown_feed() {
        let service = FeedService::new(&Config::default()).expect("empty config should build");
        let result = service
            .serve("missing", "127.0.0.1".parse().unwrap(), None)
            .await;
        assert!(matches!(result, ServeResult::UnknownFeed));
        assert_eq!(service.metrics_snapshot().requests_error, 1);
        assert_eq!(service.feed_count(), 0);
    }
}
