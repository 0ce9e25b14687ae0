//! AMQP Worker
//!
//! A reliable RabbitMQ queue consumer and producer.
//!
//! ## Features
//!
//! - **Explicit acknowledgment**: every delivery is acked after successful
//!   processing or rejected without requeue, never both
//! - **Durable queues and prefetch**: queue declared before consuming, bounded
//!   number of unacknowledged deliveries
//! - **Reconnects**: failed connections and lost sessions are retried with a
//!   `RetryPolicy` (fixed five-second delay by default); the broker redelivers
//!   whatever was unacked
//! - **Outcome metrics**: `rabbitmq_messages_processed_total{status, queue}`
//! - **Dead-letter routing**: optional, per queue
//! - **Health endpoints**: liveness and readiness probes
//! - **In-memory broker**: a test double with the same semantics
//!
//! ## Example
//!
//! ```ignore
//! use amqp_worker::{AmqpBroker, ConsumerConfig, QueueConsumer, QueueDef, PrometheusOutcomeSink};
//!
//! struct EmailQueue;
//! impl QueueDef for EmailQueue {
//!     const QUEUE_NAME: &'static str = "notificaciones_email_queue";
//! }
//!
//! let consumer = QueueConsumer::new(
//!     AmqpBroker::new(&amqp.url),
//!     processor,
//!     ConsumerConfig::from_def::<EmailQueue>().with_retry_delay(amqp.retry_delay),
//!     Arc::new(PrometheusOutcomeSink::new(registry)),
//! );
//! consumer.run(shutdown_rx).await?;
//! ```

mod broker;
mod config;
mod consumer;
mod error;
mod health;
mod lapin_broker;
pub mod memory;
mod metrics;
mod processor;
mod producer;
mod registry;
mod retry;

// Re-export main types
pub use broker::{Broker, Delivery, DeliveryStream, Session};
pub use config::{ConsumerConfig, DEFAULT_HEALTH_CHECK_INTERVAL, DeadLetterConfig, QueueDescriptor};
pub use consumer::QueueConsumer;
pub use error::{ProcessingError, QueueError};
pub use health::{
    HealthState, HealthStatus, ProducerReadiness, health_router, producer_ready_router,
};
pub use lapin_broker::{AmqpBroker, AmqpSession};
pub use memory::InMemoryBroker;
pub use metrics::{
    MESSAGES_PROCESSED_TOTAL, Outcome, OutcomeCounter, OutcomeSink, PrometheusOutcomeSink,
};
pub use processor::{FailingProcessor, NoOpProcessor, Processor};
pub use producer::QueueProducer;
pub use registry::{Job, QueueDef};
pub use retry::{BackoffStrategy, DEFAULT_RETRY_DELAY, RetryPolicy};
