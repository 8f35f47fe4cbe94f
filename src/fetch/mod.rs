//! Upstream feed retrieval and caching.
//!
//! This module owns everything between the serving layer and the origin
//! servers:
//!
//! - **Caching**: Parsed feeds are kept in an LRU store with per-feed TTLs
//! - **Revalidation**: Expired entries are refreshed with conditional
//!   requests instead of full downloads whenever the upstream supports it
//! - **Coalescing**: Concurrent requests for the same source share a single
//!   upstream fetch
//! - **Stale fallback**: When the upstream fails, an expired entry is served
//!   with a stale marker rather than returning an error
//!
//! # Architecture
//!
//! - [`CacheStore`] - LRU store of parsed documents plus their validators
//! - [`Fetcher`] - HTTP retrieval with timeouts, size caps, and the
//!   in-flight request table

mod cache;
mod fetcher;

pub use cache::{CacheEntry, CacheStore, Validator};
pub use fetcher::{FetchFailure, FetchOutcome, Fetcher};
