//! Consumer configuration
//!
//! This module provides `QueueDescriptor` (what to declare on the broker) and
//! `ConsumerConfig` (how a consumer subscribes to it).

use crate::error::QueueError;
use crate::registry::QueueDef;
use crate::retry::RetryPolicy;
use std::time::Duration;
use uuid::Uuid;

/// How often a subscribed consumer re-runs its processor's health check.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Dead-letter routing declared alongside a queue.
///
/// Rejected messages are routed by the broker to `exchange` with
/// `routing_key`, where `queue` is bound to receive them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterConfig {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

impl DeadLetterConfig {
    /// Dead-letter target for `queue_name`: the `<queue>_dlq` queue bound to
    /// `exchange` with the queue name as routing key.
    pub fn for_queue(queue_name: &str, exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: queue_name.to_string(),
            queue: format!("{}_dlq", queue_name),
        }
    }
}

/// Parameters a queue is declared with.
///
/// Name and durability are fixed once the queue exists on the broker;
/// redeclaring with different values is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    pub name: String,
    pub durable: bool,
    pub dead_letter: Option<DeadLetterConfig>,
}

impl QueueDescriptor {
    pub fn new(name: impl Into<String>, durable: bool) -> Self {
        Self {
            name: name.into(),
            durable,
            dead_letter: None,
        }
    }

    /// A durable queue without dead-letter routing.
    pub fn durable(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// Route rejected messages to `exchange` instead of discarding them.
    pub fn with_dead_letter(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter = Some(DeadLetterConfig::for_queue(&self.name, exchange));
        self
    }
}

/// Configuration for the queue consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Queue to declare and consume
    pub queue: QueueDescriptor,

    /// Maximum unacknowledged deliveries in flight (must be at least 1)
    pub prefetch: u16,

    /// Consumer tag sent with the subscription
    pub consumer_tag: String,

    /// Reconnect policy
    pub retry: RetryPolicy,

    /// Period of the processor health check while subscribed
    pub health_check_interval: Duration,
}

impl ConsumerConfig {
    /// Create a new ConsumerConfig for a durable queue with prefetch 1
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self::with_queue(QueueDescriptor::durable(queue_name))
    }

    /// Create a new ConsumerConfig from a QueueDef
    pub fn from_def<Q: QueueDef>() -> Self {
        Self::with_queue(Q::descriptor()).with_prefetch(Q::PREFETCH)
    }

    fn with_queue(queue: QueueDescriptor) -> Self {
        let consumer_tag = format!("{}-consumer-{}", queue.name, Uuid::new_v4());
        Self {
            queue,
            prefetch: 1,
            consumer_tag,
            retry: RetryPolicy::default(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
        }
    }

    /// Set queue durability
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.queue.durable = durable;
        self
    }

    /// Set the prefetch limit
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Set the consumer tag
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    /// Set the reconnect policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use a fixed reconnect delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.backoff = crate::retry::BackoffStrategy::Fixed(delay);
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Route rejected messages through a dead-letter exchange
    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.queue = self.queue.with_dead_letter(exchange);
        self
    }

    /// Name of the consumed queue
    pub fn queue_name(&self) -> &str {
        &self.queue.name
    }

    /// Reject configurations that can never work, before touching the broker.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.queue.name.trim().is_empty() {
            return Err(QueueError::Config("queue name must not be empty".into()));
        }
        if self.prefetch == 0 {
            return Err(QueueError::Config(format!(
                "prefetch for queue '{}' must be at least 1",
                self.queue.name
            )));
        }
        if self.health_check_interval.is_zero() {
            return Err(QueueError::Config(
                "health check interval must be non-zero".into(),
            ));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(QueueError::Config(
                "retry policy must allow at least one attempt".into(),
            ));
        }
        Ok(())
    }
}
