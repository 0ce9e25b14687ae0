use crate::errors::handlers::{method_not_allowed, not_found};
use axum::{
    Router,
    body::Body,
    http::{HeaderName, Request},
    middleware,
    routing::get,
};
use core_config::server::ServerConfig;
use observability::{HttpMetrics, MetricsRegistry, http_metrics, metrics_handler};
use std::future::Future;
use std::io;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

/// Header carrying the per-request correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Starts the Axum server and serves until `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
///
/// ```ignore
/// let shutdown = ShutdownCoordinator::new();
/// tokio::spawn({
///     let shutdown = shutdown.clone();
///     async move { shutdown.wait_for_signal().await }
/// });
/// create_app(router, &config, async move { shutdown.wait().await }).await?;
/// ```
pub async fn create_app<F>(router: Router, server_config: &ServerConfig, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(server_config.addr).await?;

    info!("Server starting on {}", listener.local_addr()?);
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .inspect_err(|e| {
            tracing::error!("Server encountered an error: {:?}", e);
        })?;

    info!("Server stopped");
    Ok(())
}

/// Wraps a service's routes with the cross-cutting layers every service
/// shares:
/// - `GET /metrics` rendering `registry` in Prometheus text format
/// - `http_requests_total` / `http_request_duration_seconds`, labelled
///   with `service`
/// - an `x-correlation-id` header, generated when the caller sent none and
///   echoed on the response
/// - request tracing with the correlation id on the span
/// - JSON 404 and 405 fallbacks
///
/// `routes` must already have its state applied.
pub fn create_router(service: &str, registry: MetricsRegistry, routes: Router) -> Router {
    let correlation_id = HeaderName::from_static(CORRELATION_ID_HEADER);
    let metrics = HttpMetrics::new(registry.clone(), service);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    Router::new()
        .merge(metrics_routes)
        .merge(routes)
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn_with_state(metrics, http_metrics))
        .layer(PropagateRequestIdLayer::new(correlation_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let correlation_id = request
                        .headers()
                        .get(CORRELATION_ID_HEADER)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        correlation_id,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(correlation_id, MakeRequestUuid))
}
