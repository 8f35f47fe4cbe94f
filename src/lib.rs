//! podsieve republishes podcast RSS feeds with their items filtered by
//! `itunes:keywords`.
//!
//! The pipeline: fetch the upstream feed (with conditional revalidation and
//! an in-memory TTL cache), drop items according to a per-feed keyword or
//! regex rule, mark the channel as a filtered republication of its source,
//! and serve the result over HTTP with downstream ETag handling and
//! per-client token bucket rate limiting. Everything the filter does not
//! touch round-trips byte for byte.

pub mod config;
pub mod feed;
pub mod fetch;
pub mod metrics;
pub mod server;
