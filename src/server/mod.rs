//! The serving layer.
//!
//! - [`FeedService`] - per-request orchestration: profile lookup, rate
//!   limiting, fetch, filter, conditional response
//! - [`router`] - the axum application exposing `/feeds/{feed_id}`,
//!   `/health`, and `/metrics`
//! - [`RateLimiter`] - per-client token buckets

mod http;
mod rate_limit;
mod service;

pub use http::router;
pub use rate_limit::RateLimiter;
pub use service::{FeedResponse, FeedService, ServeResult};
