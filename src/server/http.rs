//! HTTP surface: routing and response mapping.
//!
//! Three endpoints:
//!
//! - `GET /feeds/{feed_id}` - the filtered feed
//! - `GET /health` - liveness plus cache occupancy
//! - `GET /metrics` - JSON counter snapshot
//!
//! The handler layer stays thin: it extracts the client address and the
//! conditional header, hands them to [`FeedService::serve`], and maps the
//! [`ServeResult`] onto status codes and headers.
use crate::fetch::FetchFailure;
use crate::server::service::{FeedService, ServeResult};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

const FEED_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";

/// Soft signal that the body came from an expired cache entry.
const STALE_WARNING: &str = "110 - \"response is stale\"";

/// Build the application router.
pub fn router(service: Arc<FeedService>) -> Router {
    Router::new()
        .route("/feeds/{feed_id}", get(serve_feed))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(service)
}

async fn serve_feed(
    State(service): State<Arc<FeedService>>,
    Path(feed_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request_headers: HeaderMap,
) -> Response {
    let if_none_match = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    match service.serve(&feed_id, addr.ip(), if_none_match).await {
        ServeResult::Fresh(feed) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(FEED_CONTENT_TYPE),
            );
            if let Ok(value) = HeaderValue::from_str(&feed.etag) {
                headers.insert(header::ETAG, value);
            }
            if feed.served_stale {
                headers.insert(header::WARNING, HeaderValue::from_static(STALE_WARNING));
            }
            (StatusCode::OK, headers, feed.body).into_response()
        }
        ServeResult::NotModified { etag } => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&etag) {
                headers.insert(header::ETAG, value);
            }
            (StatusCode::NOT_MODIFIED, headers).into_response()
        }
        ServeResult::RateLimited { retry_after } => {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
            (
                StatusCode::TOO_MANY_REQUESTS,
                headers,
                Json(json!({ "error": "rate limit exceeded, retry later" })),
            )
                .into_response()
        }
        ServeResult::UnknownFeed => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no feed named `{feed_id}`") })),
        )
            .into_response(),
        ServeResult::Upstream(failure) => {
            let status = match &failure {
                FetchFailure::Timeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({ "error": failure.to_string() }))).into_response()
        }
    }
}

async fn health(State(service): State<Arc<FeedService>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "feeds": service.feed_count(),
        "cached_feeds": service.cached_feeds(),
    }))
}

async fn metrics(State(service): State<Arc<FeedService>>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(service.metrics_snapshot())
}

// ============================================================================
// Tests
// ============================================================================
