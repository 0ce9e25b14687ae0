//! MS_Auth
//!
//! HTTP bootstrap for the authentication service. Serves `/health` and
//! `/metrics`, records request metrics under `service="MS_Auth"`, tags every
//! request with an `x-correlation-id` and drains in-flight requests on
//! SIGINT/SIGTERM. Authentication routes mount on [`router`].

use axum::Router;
use axum_helpers::{ShutdownCoordinator, create_app, create_router, health_router};
use core_config::{Environment, app_info, server::ServerConfig, tracing::init_tracing};
use eyre::{Result, WrapErr};
use observability::MetricsRegistry;
use tracing::info;

/// Value of the `service` label on HTTP metrics.
pub const SERVICE_NAME: &str = "MS_Auth";

/// Listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3001;

/// Full application router.
pub fn router(registry: MetricsRegistry) -> Router {
    let routes = Router::new().merge(health_router(app_info!()));
    create_router(SERVICE_NAME, registry, routes)
}

/// Run the auth service until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if:
/// - `HOST`/`PORT` are invalid
/// - The listener cannot bind
/// - The server fails while serving
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    init_tracing(&environment);

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting {}", SERVICE_NAME);

    let server_config =
        ServerConfig::load(DEFAULT_PORT).wrap_err("Failed to load server configuration")?;
    let registry = MetricsRegistry::new().wrap_err("Failed to initialize metrics registry")?;

    let shutdown = ShutdownCoordinator::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.wait_for_signal().await }
    });

    create_app(router(registry), &server_config, async move {
        shutdown.wait().await
    })
    .await
    .wrap_err("HTTP server failed")?;

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_crate_name() {
        let response = router(MetricsRegistry::new().unwrap())
            .oneshot(get("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["name"], "ms_auth");
    }

    #[tokio::test]
    async fn test_requests_are_labelled_with_service() {
        let registry = MetricsRegistry::new().unwrap();
        let app = router(registry.clone());

        let response = app.oneshot(get("/login")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert!(registry.render().contains("service=\"MS_Auth\""));
    }
}
