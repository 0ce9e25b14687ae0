//! Health endpoints for the consumer.
//!
//! Liveness follows the processor only: a broker outage is retried by the
//! consumer and must not get the process restarted. Readiness needs both a
//! live broker subscription and a healthy processor.
//!
//! Services that only publish get `producer_ready_router`, which is ready
//! while the producer holds a live session.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use crate::broker::Broker;
use crate::producer::QueueProducer;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of the consumer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub processor_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared health state, updated by the consumer.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

struct HealthStateInner {
    broker_connected: bool,
    processor_healthy: bool,
    last_error: Option<String>,
}

impl HealthState {
    /// Starts disconnected; the consumer flips it once subscribed.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthStateInner {
                broker_connected: false,
                processor_healthy: true,
                last_error: None,
            })),
        }
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        self.inner.write().await.broker_connected = connected;
    }

    pub async fn set_processor_healthy(&self, healthy: bool) {
        self.inner.write().await.processor_healthy = healthy;
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.inner.write().await.last_error = error;
    }

    /// Liveness.
    pub async fn is_alive(&self) -> bool {
        self.inner.read().await.processor_healthy
    }

    /// Readiness.
    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.processor_healthy
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let status = if inner.broker_connected && inner.processor_healthy {
            "healthy"
        } else if inner.processor_healthy {
            "degraded"
        } else {
            "unhealthy"
        };
        HealthStatus {
            status: status.to_string(),
            broker_connected: inner.broker_connected,
            processor_healthy: inner.processor_healthy,
            last_error: inner.last_error.clone(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Router with `/health`, `/healthz` (liveness) and `/ready`, `/readyz` (readiness).
pub fn health_router<S>(state: HealthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/healthz", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/readyz", get(readiness_handler))
        .with_state(state)
}

async fn liveness_handler(State(state): State<HealthState>) -> impl IntoResponse {
    respond(state.is_alive().await, state.status().await)
}

async fn readiness_handler(State(state): State<HealthState>) -> impl IntoResponse {
    respond(state.is_ready().await, state.status().await)
}

fn respond(ok: bool, status: HealthStatus) -> (StatusCode, Json<HealthStatus>) {
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Readiness of a publishing service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProducerReadiness {
    pub ready: bool,
    pub queue: String,
}

/// Router with `/ready` and `/readyz`, answering 503 while `producer` has no
/// live session.
pub fn producer_ready_router<B, S>(producer: QueueProducer<B>) -> Router<S>
where
    B: Broker,
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/ready", get(producer_ready_handler::<B>))
        .route("/readyz", get(producer_ready_handler::<B>))
        .with_state(producer)
}

async fn producer_ready_handler<B: Broker>(
    State(producer): State<QueueProducer<B>>,
) -> impl IntoResponse {
    let ready = producer.is_connected().await;
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ProducerReadiness {
        ready,
        queue: producer.queue_name().to_string(),
    };
    (code, Json(body))
}
