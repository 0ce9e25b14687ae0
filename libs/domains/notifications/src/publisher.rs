//! Publisher used by other services to enqueue email notifications.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{EmailKind, EmailNotification};
use crate::queues::EmailNotificationQueue;
use amqp_worker::{Broker, QueueError, QueueProducer, RetryPolicy};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

/// Enqueues `EmailNotification`s on `notificaciones_email_queue`.
///
/// Cheap to clone. Call `run` once in a background task to keep the broker
/// session alive; `queue_email` fails while it is disconnected.
pub struct NotificationPublisher<B: Broker> {
    producer: QueueProducer<B>,
}

impl<B: Broker> Clone for NotificationPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
        }
    }
}

impl<B: Broker> NotificationPublisher<B> {
    pub fn new(broker: B, retry: RetryPolicy) -> Self {
        Self {
            producer: QueueProducer::from_def::<EmailNotificationQueue>(broker, retry),
        }
    }

    pub fn producer(&self) -> &QueueProducer<B> {
        &self.producer
    }

    /// Keep the producer connected until shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        self.producer.run(shutdown).await
    }

    pub async fn is_connected(&self) -> bool {
        self.producer.is_connected().await
    }

    /// Validate and enqueue an email, returning its notification id.
    pub async fn queue_email(
        &self,
        kind: EmailKind,
        to: &str,
        subject: &str,
        body: &str,
    ) -> NotificationResult<Uuid> {
        let notification = EmailNotification::new(kind, to, subject, body);
        self.publish(&notification).await?;
        Ok(notification.id)
    }

    pub async fn publish(&self, notification: &EmailNotification) -> NotificationResult<()> {
        if notification.validate().is_err() {
            return Err(NotificationError::InvalidEmail(notification.to.clone()));
        }

        self.producer.publish(notification).await?;

        debug!(
            job_id = %notification.id,
            kind = %notification.kind,
            to = %notification.to,
            "Queued email notification"
        );
        Ok(())
    }
}
