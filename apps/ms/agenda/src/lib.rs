//! MS_Agenda
//!
//! HTTP bootstrap for the agenda service plus the notification publisher it
//! uses to enqueue appointment emails on `notificaciones_email_queue`.
//!
//! ## Endpoints
//!
//! - `/health`: liveness, app name and version
//! - `/ready`, `/readyz`: 503 until the publisher holds a broker session
//! - `/metrics`: Prometheus text format

use amqp_worker::{AmqpBroker, Broker, RetryPolicy, producer_ready_router};
use axum::Router;
use axum_helpers::{ShutdownCoordinator, create_app, create_router, health_router};
use core_config::{
    Environment, FromEnv, amqp::AmqpConfig, app_info, server::ServerConfig, tracing::init_tracing,
};
use domain_notifications::NotificationPublisher;
use eyre::{Result, WrapErr};
use observability::MetricsRegistry;
use tracing::{error, info};

/// Value of the `service` label on HTTP metrics.
pub const SERVICE_NAME: &str = "MS_Agenda";

/// Listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3003;

/// Full application router. Appointment routes receive `publisher` to
/// enqueue their emails.
pub fn router<B: Broker>(registry: MetricsRegistry, publisher: &NotificationPublisher<B>) -> Router {
    let routes = Router::new()
        .merge(health_router(app_info!()))
        .merge(producer_ready_router(publisher.producer().clone()));
    create_router(SERVICE_NAME, registry, routes)
}

/// Run the agenda service until a shutdown signal arrives.
///
/// The publisher reconnects in the background; a broker outage makes the
/// service unready but never stops it.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    init_tracing(&environment);

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting {}", SERVICE_NAME);

    let server_config =
        ServerConfig::load(DEFAULT_PORT).wrap_err("Failed to load server configuration")?;
    let amqp = AmqpConfig::from_env().wrap_err("Failed to load AMQP configuration")?;
    let registry = MetricsRegistry::new().wrap_err("Failed to initialize metrics registry")?;

    let broker = AmqpBroker::new(&amqp.url);
    info!(url = %broker.redacted_url(), "Using AMQP broker");
    let publisher = NotificationPublisher::new(broker, RetryPolicy::fixed(amqp.retry_delay));

    let shutdown = ShutdownCoordinator::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.wait_for_signal().await }
    });

    let publisher_task = tokio::spawn({
        let publisher = publisher.clone();
        let rx = shutdown.subscribe();
        async move { publisher.run(rx).await }
    });

    let served = create_app(router(registry, &publisher), &server_config, {
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    })
    .await
    .wrap_err("HTTP server failed");

    // Stop the publisher even when the server failed on its own.
    shutdown.shutdown();
    match publisher_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Notification publisher stopped with an error"),
        Err(e) => error!(error = %e, "Notification publisher task failed"),
    }

    served?;
    info!("{} stopped", SERVICE_NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_worker::InMemoryBroker;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_ready_follows_publisher_connection() {
        let broker = InMemoryBroker::new();
        let publisher = NotificationPublisher::new(broker, RetryPolicy::default());
        let app = router(MetricsRegistry::new().unwrap(), &publisher);

        let response = app.clone().oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        publisher.producer().connect().await.unwrap();
        let response = app.clone().oneshot(get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
