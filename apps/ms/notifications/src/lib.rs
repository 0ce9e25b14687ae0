//! MS_Notificaciones
//!
//! Email notification service: an HTTP server and a reliable consumer of
//! `notificaciones_email_queue` running side by side.
//!
//! ## Architecture
//!
//! ```text
//! notificaciones_email_queue (durable, prefetch 1)
//!   ↓
//! QueueConsumer<EmailNotification, EmailNotificationProcessor>
//!   ↓ ack on success / reject without requeue on failure
//! rabbitmq_messages_processed_total{status, queue}
//!   ↓
//! GET /metrics
//! ```
//!
//! The service also keeps a [`NotificationPublisher`] connected on its own
//! broker connection so notification routes can enqueue emails.
//!
//! A broker outage is retried every `AMQP_RETRY_DELAY_MS` (5 s by default)
//! and only makes the service unready. A queue declared elsewhere with a
//! different durability stops the service with an error.

use amqp_worker::{
    AmqpBroker, Broker, ConsumerConfig, HealthState, PrometheusOutcomeSink, QueueConsumer,
    QueueDef, RetryPolicy, health_router,
};
use axum::Router;
use axum_helpers::{ShutdownCoordinator, create_app, create_router};
use core_config::{
    Environment, FromEnv, amqp::AmqpConfig, app_info, server::ServerConfig, tracing::init_tracing,
};
use domain_notifications::{
    EmailNotification, EmailNotificationProcessor, EmailNotificationQueue, EmailProvider,
    LogProvider, NotificationPublisher,
};
use eyre::{Result, WrapErr};
use observability::MetricsRegistry;
use std::sync::Arc;
use tracing::{error, info};

/// Value of the `service` label on HTTP metrics.
pub const SERVICE_NAME: &str = "MS_Notificaciones";

/// Listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3004;

/// Full application router.
///
/// `/health` and `/ready` come from the consumer's health state: liveness
/// follows the email provider, readiness also needs the broker subscription.
pub fn router(registry: MetricsRegistry, health: HealthState) -> Router {
    let routes = Router::new().merge(health_router(health));
    create_router(SERVICE_NAME, registry, routes)
}

/// Build the queue consumer wired to the Prometheus registry.
pub fn email_consumer<B, P>(
    broker: B,
    provider: P,
    amqp: &AmqpConfig,
    registry: MetricsRegistry,
    health: HealthState,
) -> QueueConsumer<B, EmailNotification, EmailNotificationProcessor<P>>
where
    B: Broker,
    P: EmailProvider + 'static,
{
    let config = ConsumerConfig::from_def::<EmailNotificationQueue>()
        .with_prefetch(amqp.prefetch)
        .with_retry_delay(amqp.retry_delay);

    QueueConsumer::new(
        broker,
        EmailNotificationProcessor::new(provider),
        config,
        Arc::new(PrometheusOutcomeSink::new(registry)),
    )
    .with_health(health)
}

/// Build the publisher for `notificaciones_email_queue`, reconnecting at the
/// configured AMQP retry delay.
pub fn notification_publisher<B: Broker>(
    broker: B,
    amqp: &AmqpConfig,
) -> NotificationPublisher<B> {
    NotificationPublisher::new(broker, RetryPolicy::fixed(amqp.retry_delay))
}

/// Run the notifications service.
///
/// Returns once a shutdown signal has drained the server, the consumer and
/// the publisher.
///
/// # Errors
///
/// Returns an error if:
/// - Server or AMQP configuration is invalid
/// - The listener cannot bind
/// - The consumer hits a non-retryable error (e.g. a conflicting queue
///   declaration); the HTTP server is shut down first
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    init_tracing(&environment);

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting {}", SERVICE_NAME);
    info!("Environment: {:?}", environment);

    let server_config =
        ServerConfig::load(DEFAULT_PORT).wrap_err("Failed to load server configuration")?;
    let amqp = AmqpConfig::from_env().wrap_err("Failed to load AMQP configuration")?;
    let registry = MetricsRegistry::new().wrap_err("Failed to initialize metrics registry")?;

    let broker = AmqpBroker::new(&amqp.url);
    info!(
        url = %broker.redacted_url(),
        queue = EmailNotificationQueue::queue_name(),
        prefetch = amqp.prefetch,
        retry_delay_ms = amqp.retry_delay.as_millis() as u64,
        "Consumer configuration loaded"
    );

    let publisher = notification_publisher(broker.clone(), &amqp);
    let health = HealthState::new();
    let consumer = email_consumer(broker, LogProvider::new(), &amqp, registry.clone(), health.clone());

    let shutdown = ShutdownCoordinator::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.wait_for_signal().await }
    });

    let consumer_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let result = consumer.run(shutdown.subscribe()).await;
            if result.is_err() {
                // Take the HTTP server down with the consumer.
                shutdown.shutdown();
            }
            result
        }
    });

    let publisher_task = tokio::spawn({
        let rx = shutdown.subscribe();
        async move { publisher.run(rx).await }
    });

    let served = create_app(router(registry, health), &server_config, {
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    })
    .await
    .wrap_err("HTTP server failed");

    shutdown.shutdown();
    let consumed = consumer_task.await.wrap_err("Queue consumer task failed")?;
    match publisher_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Notification publisher stopped with an error"),
        Err(e) => error!(error = %e, "Notification publisher task failed"),
    }

    served?;
    consumed.wrap_err("Queue consumer stopped")?;

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
