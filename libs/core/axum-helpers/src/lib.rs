//! # Axum Helpers
//!
//! Shared HTTP plumbing for the campus services.
//!
//! ## Modules
//!
//! - **[`server`]**: Router composition, server startup, health, graceful shutdown
//! - **[`errors`]**: Structured JSON error responses with error codes
//!
//! ## Quick Start
//!
//! ```ignore
//! use axum::Router;
//! use axum_helpers::{ShutdownCoordinator, create_app, create_router, health_router};
//! use core_config::{app_info, server::ServerConfig};
//! use observability::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new()?;
//! let routes = Router::new().merge(health_router(app_info!()));
//! let router = create_router("MS_Tutorias", registry, routes);
//!
//! let shutdown = ShutdownCoordinator::new();
//! create_app(router, &ServerConfig::load(3001)?, async move { shutdown.wait().await }).await?;
//! ```

pub mod errors;
pub mod server;

// Re-export server types
pub use server::{
    CORRELATION_ID_HEADER, HealthResponse, ShutdownCoordinator, create_app, create_router,
    health_router, shutdown_signal,
};

// Re-export error types
pub use errors::{ErrorCode, ErrorResponse, error_response};
