//! Upstream feed retrieval.
//!
//! The fetcher owns the HTTP client and the feed cache. Each source URL has
//! at most one network request in flight at a time: concurrent callers for
//! the same URL attach to the running fetch and share its result. Fetches
//! run on a detached task, so a caller that disconnects mid-request never
//! cancels work other callers are waiting on.
//!
//! Expired cache entries are revalidated with `If-None-Match` /
//! `If-Modified-Since`; a `304 Not Modified` keeps the stored document and
//! restarts its TTL. When the upstream is unreachable and an expired entry
//! exists, the entry is served anyway with a stale marker.
use crate::feed::FeedDocument;
use crate::fetch::cache::{CacheEntry, CacheStore, Validator};
use crate::metrics::Metrics;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderName};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Substrings accepted in an upstream `Content-Type`. Anything else is
/// logged and tolerated; some hosts serve feeds as `text/plain`.
const FEED_CONTENT_HINTS: [&str; 4] = ["rss", "atom", "xml", "feed"];

// ============================================================================
// Error Types
// ============================================================================

/// Why an upstream fetch produced no usable document.
///
/// Cloneable because one failure is fanned out to every caller coalesced
/// onto the same request.
#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    /// The upstream did not respond within the configured timeout.
    #[error("upstream request timed out")]
    Timeout,

    /// Connection-level failure: DNS, TLS, refused, reset.
    #[error("network error: {0}")]
    Network(String),

    /// The upstream answered with a non-success status code.
    #[error("upstream returned HTTP {0}")]
    Status(u16),

    /// The payload exceeded the configured size cap.
    #[error("feed payload exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    /// The connection closed before `Content-Length` bytes arrived.
    #[error("incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },

    /// The body was not a parseable RSS document.
    #[error("malformed feed: {0}")]
    Malformed(String),
}

// ============================================================================
// Fetch Results
// ============================================================================

/// A successfully resolved fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub document: Arc<FeedDocument>,
    /// True when the upstream failed and an expired cache entry was used
    /// as a fallback.
    pub served_stale: bool,
}

/// Terminal signal published by a fetch task. `None` means still running.
type FetchSignal = Option<Result<(), FetchFailure>>;

enum FetchRole {
    /// This caller registered the in-flight entry and owns the fetch task.
    Leader(watch::Sender<FetchSignal>),
    /// Another caller's fetch is already running; wait on its signal.
    Waiter(watch::Receiver<FetchSignal>),
}

/// What the network phase of a fetch produced.
enum Exchange {
    /// Upstream confirmed the stored representation is current; carries the
    /// validators from the `304` itself, which may be partial.
    NotModified(Validator),
    /// A full body arrived.
    Full { validator: Validator, body: Vec<u8> },
}

// ============================================================================
// Fetcher
// ============================================================================

/// Shared upstream fetcher. Cheap to clone; clones share the client, the
/// cache, and the in-flight request table.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    cache: Arc<CacheStore>,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
    max_payload_bytes: usize,
    inflight: Arc<Mutex<HashMap<String, watch::Receiver<FetchSignal>>>>,
}

impl Fetcher {
    pub fn new(
        cache: Arc<CacheStore>,
        metrics: Arc<Metrics>,
        request_timeout: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache,
            metrics,
            request_timeout,
            max_payload_bytes,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve `url` to a parsed feed document.
    ///
    /// A fresh cache entry is returned without touching the network. An
    /// expired or missing entry triggers a fetch, shared with any concurrent
    /// callers for the same URL. `user_agent` is sent verbatim as the
    /// `User-Agent` header.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] when the upstream cannot be reached or does
    /// not yield a parseable document and no cached fallback exists.
    pub async fn fetch(
        &self,
        url: &str,
        ttl: Duration,
        user_agent: &str,
    ) -> Result<FetchOutcome, FetchFailure> {
        if let Some(entry) = self.cache.get(url) {
            if !entry.is_expired() {
                self.metrics.record_cache_hit();
                tracing::debug!(url, "serving fresh cache entry");
                return Ok(FetchOutcome {
                    document: entry.document,
                    served_stale: false,
                });
            }
        }

        let rx = match self.join_or_lead(url) {
            FetchRole::Leader(tx) => {
                let rx = tx.subscribe();
                let fetcher = self.clone();
                let fetch_url = url.to_string();
                let agent = user_agent.to_string();
                tokio::spawn(async move {
                    let result = fetcher.perform_fetch(&fetch_url, ttl, &agent).await;
                    if let Err(failure) = &result {
                        tracing::warn!(url = %fetch_url, error = %failure, "upstream fetch failed");
                    }
                    // Publish before unregistering so any caller that found
                    // the in-flight entry always observes a terminal signal.
                    tx.send_replace(Some(result));
                    fetcher.unregister(&fetch_url, &tx.subscribe());
                });
                rx
            }
            FetchRole::Waiter(rx) => {
                tracing::debug!(url, "joining in-flight fetch");
                rx
            }
        };

        self.await_signal(url, rx).await
    }

    /// Register as leader for `url`, or attach to the existing fetch.
    fn join_or_lead(&self, url: &str) -> FetchRole {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = inflight.get(url) {
            return FetchRole::Waiter(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        inflight.insert(url.to_string(), rx);
        FetchRole::Leader(tx)
    }

    /// Remove the in-flight registration for `url`, provided it still belongs
    /// to the channel `rx` came from. A late cleanup for a finished or dead
    /// fetch must never evict a newer fetch's registration.
    fn unregister(&self, url: &str, rx: &watch::Receiver<FetchSignal>) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if inflight
            .get(url)
            .is_some_and(|registered| registered.same_channel(rx))
        {
            inflight.remove(url);
        }
    }

    /// Wait for the fetch task's terminal signal, then resolve the result
    /// from the cache.
    async fn await_signal(
        &self,
        url: &str,
        mut rx: watch::Receiver<FetchSignal>,
    ) -> Result<FetchOutcome, FetchFailure> {
        let waited = rx
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone());
        let signal = match waited {
            Ok(value) => value
                .unwrap_or_else(|| Err(FetchFailure::Network("fetch task vanished".to_string()))),
            Err(_) => {
                // The fetch task died without signalling (panic). Clear its
                // registration, unless a newer fetch already replaced it.
                self.unregister(url, &rx);
                Err(FetchFailure::Network("fetch task abandoned".to_string()))
            }
        };

        match (signal, self.cache.get(url)) {
            (Ok(()), Some(entry)) => Ok(FetchOutcome {
                document: entry.document,
                served_stale: false,
            }),
            (Err(failure), Some(entry)) => {
                self.metrics.record_stale_served();
                tracing::warn!(url, error = %failure, "serving stale cache entry after upstream failure");
                Ok(FetchOutcome {
                    document: entry.document,
                    served_stale: true,
                })
            }
            (Err(failure), None) => Err(failure),
            (Ok(()), None) => Err(FetchFailure::Network(
                "cache entry evicted while fetch completed".to_string(),
            )),
        }
    }

    /// Run the actual network exchange and store the result in the cache.
    ///
    /// Runs on a detached task owned by the leader registration, never
    /// directly inside a request handler.
    async fn perform_fetch(
        &self,
        url: &str,
        ttl: Duration,
        user_agent: &str,
    ) -> Result<(), FetchFailure> {
        // Another leader may have finished between the caller's cache check
        // and this task starting.
        let stale = self.cache.get(url);
        if let Some(entry) = &stale {
            if !entry.is_expired() {
                return Ok(());
            }
        }

        let mut request = self.client.get(url).header(header::USER_AGENT, user_agent);
        if let Some(entry) = &stale {
            if let Some(etag) = &entry.validator.etag {
                request = request.header(header::IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &entry.validator.last_modified {
                request = request.header(header::IF_MODIFIED_SINCE, last_modified);
            }
        }

        self.metrics.record_cache_miss();
        tracing::debug!(
            url,
            conditional = stale.as_ref().is_some_and(|entry| !entry.validator.is_empty()),
            "requesting upstream feed"
        );

        // One clock over the whole exchange, headers and body alike. The
        // fetch runs detached with every coalesced caller parked on its
        // signal, so a body that stalls mid-stream must still hit the
        // timeout instead of wedging the channel.
        let exchange = tokio::time::timeout(self.request_timeout, async {
            let response = request
                .send()
                .await
                .map_err(|e| FetchFailure::Network(e.to_string()))?;

            if response.status() == reqwest::StatusCode::NOT_MODIFIED {
                return Ok(Exchange::NotModified(Validator {
                    etag: header_string(response.headers(), header::ETAG),
                    last_modified: header_string(response.headers(), header::LAST_MODIFIED),
                }));
            }

            let status = response.status();
            if !status.is_success() {
                return Err(FetchFailure::Status(status.as_u16()));
            }

            warn_on_unexpected_content_type(url, response.headers());

            let validator = Validator {
                etag: header_string(response.headers(), header::ETAG),
                last_modified: header_string(response.headers(), header::LAST_MODIFIED),
            };
            let body = self.read_limited(response).await?;
            Ok(Exchange::Full { validator, body })
        })
        .await
        .map_err(|_| FetchFailure::Timeout)??;

        match exchange {
            Exchange::NotModified(fresh) => {
                let Some(previous) = stale else {
                    // A 304 is only meaningful against a stored representation.
                    return Err(FetchFailure::Status(304));
                };
                // The 304 may carry updated validators; keep the old ones
                // where it stays silent.
                let validator = Validator {
                    etag: fresh.etag.or(previous.validator.etag),
                    last_modified: fresh.last_modified.or(previous.validator.last_modified),
                };
                self.metrics.record_upstream_not_modified();
                tracing::debug!(url, "upstream unchanged, restarting cache TTL");
                self.cache
                    .put(url.to_string(), CacheEntry::new(previous.document, validator, ttl));
                Ok(())
            }
            Exchange::Full { validator, body } => {
                let document = FeedDocument::parse(&body)
                    .map_err(|e| FetchFailure::Malformed(e.to_string()))?;
                tracing::info!(
                    url,
                    items = document.item_count(),
                    bytes = body.len(),
                    "fetched upstream feed"
                );
                self.cache
                    .put(url.to_string(), CacheEntry::new(Arc::new(document), validator, ttl));
                Ok(())
            }
        }
    }

    /// Read the response body, enforcing the payload cap.
    ///
    /// The declared `Content-Length` is checked before reading anything, and
    /// the cap is enforced again while streaming in case the declaration was
    /// absent or wrong.
    async fn read_limited(&self, response: reqwest::Response) -> Result<Vec<u8>, FetchFailure> {
        let declared = response.content_length();
        if let Some(length) = declared {
            if length > self.max_payload_bytes as u64 {
                return Err(FetchFailure::TooLarge {
                    max_bytes: self.max_payload_bytes,
                });
            }
        }

        let mut body =
            Vec::with_capacity(declared.unwrap_or(0).min(self.max_payload_bytes as u64) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchFailure::Network(e.to_string()))?;
            if body.len() + chunk.len() > self.max_payload_bytes {
                return Err(FetchFailure::TooLarge {
                    max_bytes: self.max_payload_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        if let Some(length) = declared {
            if (body.len() as u64) < length {
                return Err(FetchFailure::Incomplete {
                    expected: length,
                    received: body.len(),
                });
            }
        }

        Ok(body)
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(&name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn warn_on_unexpected_content_type(url: &str, headers: &HeaderMap) {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return;
    };
    let lowered = content_type.to_ascii_lowercase();
    if !FEED_CONTENT_HINTS.iter().any(|hint| lowered.contains(hint)) {
        tracing::warn!(url, content_type, "unexpected content type for a feed");
    }
}

// ============================================================================
// Tests
// ============================================================================
