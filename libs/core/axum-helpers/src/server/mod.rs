//! Server infrastructure module.
//!
//! This module provides:
//! - Router composition with metrics, correlation ids and tracing
//! - The `/health` endpoint for HTTP-only services
//! - Graceful shutdown coordination
//!
//! # Example
//!
//! ```ignore
//! use axum_helpers::server::{ShutdownCoordinator, create_app, create_router, health_router};
//! use core_config::app_info;
//!
//! let routes = Router::new().merge(health_router(app_info!()));
//! let app = create_router("MS_Auth", registry, routes);
//!
//! let shutdown = ShutdownCoordinator::new();
//! create_app(app, &ServerConfig::load(3001)?, async move { shutdown.wait().await }).await?;
//! ```

pub mod app;
pub mod health;
pub mod shutdown;

pub use app::{CORRELATION_ID_HEADER, create_app, create_router};
pub use health::{HealthResponse, health_router};
pub use shutdown::{ShutdownCoordinator, shutdown_signal};
