//! Queue definitions for the notifications domain.

use amqp_worker::QueueDef;

/// Email notification queue.
///
/// Filled by the agenda and users services, drained by the notifications
/// service one message at a time.
pub struct EmailNotificationQueue;

impl QueueDef for EmailNotificationQueue {
    const QUEUE_NAME: &'static str = "notificaciones_email_queue";
}
