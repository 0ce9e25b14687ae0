//! MS_Tutorias
//!
//! HTTP bootstrap for the tutoring orchestrator.

use axum::Router;
use axum_helpers::{ShutdownCoordinator, create_app, create_router, health_router};
use core_config::{Environment, app_info, server::ServerConfig, tracing::init_tracing};
use eyre::{Result, WrapErr};
use observability::MetricsRegistry;
use tracing::info;

pub const SERVICE_NAME: &str = "MS_Tutorias";

/// Listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3000;

pub fn router(registry: MetricsRegistry) -> Router {
    let routes = Router::new().merge(health_router(app_info!()));
    create_router(SERVICE_NAME, registry, routes)
}

pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    init_tracing(&environment);

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting {}", SERVICE_NAME);
    info!("Environment: {:?}", environment);

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
