//! Notifications Domain
//!
//! Email notifications delivered asynchronously over RabbitMQ.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  MS_Agenda / Users   │  ← NotificationPublisher
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │ notificaciones_email │  ← durable queue
//! │        _queue        │
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │   QueueConsumer +    │  ← MS_Notificaciones, prefetch 1,
//! │ EmailNotification-   │    ack on success, reject otherwise
//! │      Processor       │
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │    EmailProvider     │
//! └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{EmailKind, NotificationPublisher};
//!
//! let publisher = NotificationPublisher::new(AmqpBroker::new(&amqp.url), RetryPolicy::default());
//! publisher
//!     .queue_email(EmailKind::Welcome, "ana@example.com", "Bienvenida", "...")
//!     .await?;
//! ```

pub mod error;
pub mod models;
pub mod processor;
pub mod providers;
pub mod publisher;
pub mod queues;

// Re-export commonly used types
pub use error::{NotificationError, NotificationResult};
pub use models::{EmailKind, EmailNotification};
pub use processor::EmailNotificationProcessor;
pub use providers::{EmailContent, EmailProvider, LogProvider, SentEmail};
pub use publisher::NotificationPublisher;
pub use queues::EmailNotificationQueue;
