//! Queue and job definitions.
//!
//! This module provides:
//! - `Job` trait for message payloads carried over a queue
//! - `QueueDef` trait for domain-specific queue definitions

use crate::config::QueueDescriptor;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for queue job payloads.
///
/// Jobs travel as JSON documents. The consumer decodes every delivery into the
/// job type before handing it to the processor.
///
/// # Example
///
/// ```rust,ignore
/// use amqp_worker::Job;
///
/// #[derive(Serialize, Deserialize)]
/// struct EmailNotification {
///     id: Uuid,
///     to: String,
/// }
///
/// impl Job for EmailNotification {
///     fn job_id(&self) -> String {
///         self.id.to_string()
///     }
/// }
/// ```
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the job ID for logging and tracking.
    fn job_id(&self) -> String;

    /// Short label describing the job kind, used in logs.
    fn job_type(&self) -> &'static str {
        "job"
    }
}

/// Any JSON document, for queues whose payloads have no fixed shape.
///
/// The job id is the top-level `id` field when present.
impl Job for serde_json::Value {
    fn job_id(&self) -> String {
        match self.get("id") {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(id) => id.to_string(),
            None => String::new(),
        }
    }

    fn job_type(&self) -> &'static str {
        "json"
    }
}

/// Queue definition trait.
///
/// Each domain implements this trait so producers and consumers of the same
/// queue agree on its name and parameters.
///
/// # Example
///
/// ```rust,ignore
/// use amqp_worker::QueueDef;
///
/// pub struct EmailNotificationQueue;
///
/// impl QueueDef for EmailNotificationQueue {
///     const QUEUE_NAME: &'static str = "notificaciones_email_queue";
/// }
/// ```
pub trait QueueDef: Send + Sync {
    /// The queue name.
    const QUEUE_NAME: &'static str;

    /// Whether the queue survives a broker restart.
    const DURABLE: bool = true;

    /// Maximum unacknowledged deliveries per consumer.
    const PREFETCH: u16 = 1;

    /// Exchange that receives rejected messages, if any.
    const DEAD_LETTER_EXCHANGE: Option<&'static str> = None;

    /// Get the queue name.
    fn queue_name() -> &'static str {
        Self::QUEUE_NAME
    }

    /// Build the descriptor used to declare this queue.
    fn descriptor() -> QueueDescriptor {
        let queue = QueueDescriptor::new(Self::QUEUE_NAME, Self::DURABLE);
        match Self::DEAD_LETTER_EXCHANGE {
            Some(exchange) => queue.with_dead_letter(exchange),
            None => queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainQueue;
    impl QueueDef for PlainQueue {
        const QUEUE_NAME: &'static str = "plain_queue";
    }

    struct DeadLetteredQueue;
    impl QueueDef for DeadLetteredQueue {
        const QUEUE_NAME: &'static str = "orders";
        const DURABLE: bool = false;
        const PREFETCH: u16 = 10;
        const DEAD_LETTER_EXCHANGE: Option<&'static str> = Some("orders.dlx");
    }

    #[test]
    fn test_queue_def_defaults() {
        assert_eq!(PlainQueue::queue_name(), "plain_queue");
        assert_eq!(PlainQueue::PREFETCH, 1);

        let descriptor = PlainQueue::descriptor();
        assert!(descriptor.durable);
        assert!(descriptor.dead_letter.is_none());
    }

    #[test]
    fn test_queue_def_dead_letter() {
        let descriptor = DeadLetteredQueue::descriptor();
        assert_eq!(descriptor.name, "orders");
        assert!(!descriptor.durable);

        let dead_letter = descriptor.dead_letter.unwrap();
        assert_eq!(dead_letter.exchange, "orders.dlx");
        assert_eq!(dead_letter.queue, "orders_dlq");
        assert_eq!(dead_letter.routing_key, "orders");
    }

    #[test]
    fn test_json_value_job_id() {
        let job = serde_json::json!({"id": "abc", "to": "a@b.c"});
        assert_eq!(job.job_id(), "abc");
        assert_eq!(serde_json::json!({"id": 7}).job_id(), "7");
        assert_eq!(serde_json::json!([1, 2]).job_id(), "");
    }
}
