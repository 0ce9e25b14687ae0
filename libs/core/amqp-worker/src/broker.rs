//! Broker abstraction.
//!
//! A `Broker` hands out sessions; a `Session` is one connection plus one
//! channel. The consumer and producer only talk to these traits, so the same
//! code runs against RabbitMQ (`AmqpBroker`) and the in-memory double
//! (`InMemoryBroker`).

use crate::config::QueueDescriptor;
use crate::error::QueueError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A message received from the broker.
///
/// Owned by the consumer until it is acked or rejected through the session
/// that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to ack or nack this delivery.
    pub delivery_tag: u64,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    /// Raw message body.
    pub payload: Vec<u8>,
}

/// Stream of deliveries for one subscription.
///
/// An `Err` item or the end of the stream means the session is gone.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, QueueError>>;

/// Connection provider.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Session: Session;

    /// Open a fresh connection and channel.
    async fn connect(&self) -> Result<Self::Session, QueueError>;
}

/// A live connection and channel pair.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Declare a queue (and its dead-letter target, if configured).
    ///
    /// Idempotent for matching parameters. Fails with
    /// `QueueError::ConfigurationConflict` when the queue exists with
    /// different ones.
    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<(), QueueError>;

    /// Limit unacknowledged deliveries on this channel.
    async fn set_prefetch(&self, prefetch: u16) -> Result<(), QueueError>;

    /// Subscribe to a queue with manual acknowledgment.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, QueueError>;

    /// Cancel a subscription. Deliveries already received stay unacked until settled.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), QueueError>;

    /// Positively acknowledge a delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError>;

    /// Negatively acknowledge a delivery.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError>;

    /// Publish a persistent message to `queue` through the default exchange.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Whether both the connection and the channel are still open.
    fn is_connected(&self) -> bool;

    /// Close the channel and the connection.
    async fn close(&self) -> Result<(), QueueError>;
}
