//! Axum middleware for automatic HTTP request metrics.

use crate::MetricsRegistry;
use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, Response},
    middleware::Next,
};
use std::sync::Arc;
use std::time::Instant;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// `route` label shared by every request that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Histogram buckets for `http_request_duration_seconds`, in seconds.
pub const DURATION_BUCKETS: [f64; 8] = [0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Middleware state: where to record and which service label to use.
#[derive(Clone)]
pub struct HttpMetrics {
    registry: MetricsRegistry,
    service: Arc<str>,
}

impl HttpMetrics {
    pub fn new(registry: MetricsRegistry, service: impl Into<Arc<str>>) -> Self {
        Self {
            registry,
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

/// Middleware function for recording HTTP request metrics.
///
/// Records, labelled by `method`, `route`, `code` and `service`:
/// - `http_requests_total` - Counter
/// - `http_request_duration_seconds` - Histogram
///
/// `route` is the matched route template when there is one, otherwise
/// [`UNMATCHED_ROUTE`]. Raw paths are never used as label values.
///
/// # Example
///
/// ```rust,ignore
/// use axum::{Router, middleware};
/// use observability::{HttpMetrics, http_metrics};
///
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(middleware::from_fn_with_state(
///         HttpMetrics::new(registry, "MS_Auth"),
///         http_metrics,
///     ));
/// ```
pub async fn http_metrics(
    State(metrics): State<HttpMetrics>,
    matched_path: Option<MatchedPath>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let response = next.run(request).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("code", response.status().as_u16().to_string()),
        ("service", metrics.service.to_string()),
    ];

    metrics
        .registry
        .counter(HTTP_REQUESTS_TOTAL, &labels)
        .increment(1);
    metrics
        .registry
        .histogram(HTTP_REQUEST_DURATION_SECONDS, &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
