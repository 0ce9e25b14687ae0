//! Observability utilities for the campus services.
//!
//! This crate provides:
//! - `MetricsRegistry`, an explicitly constructed Prometheus recorder that is
//!   passed to whatever records metrics (no global recorder is installed)
//! - Process metrics (CPU, memory, file descriptors, threads) refreshed on
//!   every render
//! - Axum middleware for per-request HTTP metrics
//! - The `/metrics` handler
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{MetricsRegistry, metrics_handler};
//!
//! let registry = MetricsRegistry::new()?;
//! registry
//!     .counter("rabbitmq_messages_processed_total", &[("status", "success".into())])
//!     .increment(1);
//!
//! let app = Router::new()
//!     .route("/metrics", get(metrics_handler))
//!     .with_state(registry);
//! ```

pub mod middleware;

pub use middleware::{
    DURATION_BUCKETS, HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL, HttpMetrics,
    UNMATCHED_ROUTE, http_metrics,
};

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics::{Counter, Histogram, Label, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use metrics_process::Collector;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to build metrics recorder: {0}")]
    Build(#[from] BuildError),
}

struct Inner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    process: Collector,
}

/// Prometheus metrics registry.
///
/// Cheap to clone; all clones record into and render the same set of metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<Inner>,
}

impl MetricsRegistry {
    /// Build a registry with the HTTP duration buckets configured and the
    /// `process_*` metrics described.
    pub fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
                &DURATION_BUCKETS,
            )?
            .build_recorder();
        let handle = recorder.handle();

        let registry = Self {
            inner: Arc::new(Inner {
                recorder,
                handle,
                process: Collector::default(),
            }),
        };
        metrics::with_local_recorder(&registry.inner.recorder, || {
            registry.inner.process.describe()
        });
        registry.describe_counter(HTTP_REQUESTS_TOTAL, "Total HTTP requests received");
        registry.describe_histogram(
            HTTP_REQUEST_DURATION_SECONDS,
            "HTTP request duration in seconds",
        );

        debug!("Prometheus metrics registry initialized");
        Ok(registry)
    }

    /// Counter handle for `name` with the given labels.
    pub fn counter(&self, name: &'static str, labels: &[(&'static str, String)]) -> Counter {
        let labels = to_labels(labels);
        metrics::with_local_recorder(&self.inner.recorder, || counter!(name, labels))
    }

    /// Histogram handle for `name` with the given labels.
    pub fn histogram(&self, name: &'static str, labels: &[(&'static str, String)]) -> Histogram {
        let labels = to_labels(labels);
        metrics::with_local_recorder(&self.inner.recorder, || histogram!(name, labels))
    }

    pub fn describe_counter(&self, name: &'static str, help: &'static str) {
        metrics::with_local_recorder(&self.inner.recorder, || describe_counter!(name, help));
    }

    pub fn describe_histogram(&self, name: &'static str, help: &'static str) {
        metrics::with_local_recorder(&self.inner.recorder, || describe_histogram!(name, help));
    }

    /// Render every metric in the Prometheus text format.
    ///
    /// Process metrics are sampled right before rendering.
    pub fn render(&self) -> String {
        metrics::with_local_recorder(&self.inner.recorder, || self.inner.process.collect());
        self.inner.handle.render()
    }
}

fn to_labels(labels: &[(&'static str, String)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

/// Axum handler for the /metrics endpoint
pub async fn metrics_handler(State(registry): State<MetricsRegistry>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        registry.render(),
    )
}
