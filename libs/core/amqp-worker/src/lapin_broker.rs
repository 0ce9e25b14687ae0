//! RabbitMQ broker backed by `lapin`.

use crate::broker::{Broker, Delivery, DeliveryStream, Session};
use crate::config::QueueDescriptor;
use crate::error::QueueError;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

/// Persistent delivery mode for published messages.
const PERSISTENT: u8 = 2;

/// Reply code for a normal channel/connection close.
const REPLY_SUCCESS: u16 = 200;

/// Broker reachable over an `amqp://` connection string.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    url: String,
}

impl AmqpBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connection string with credentials masked, for logging.
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***@{}", &self.url[..scheme_end], &self.url[at + 1..])
            }
            _ => self.url.clone(),
        }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Session = AmqpSession;

    async fn connect(&self) -> Result<AmqpSession, QueueError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(QueueError::connection)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(QueueError::connection)?;

        info!(url = %self.redacted_url(), "Connected to AMQP broker");
        Ok(AmqpSession {
            connection,
            channel,
        })
    }
}

/// One `lapin` connection with one channel.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

/// A queue redeclared with different arguments fails with a
/// PRECONDITION_FAILED channel error.
fn declare_error(err: lapin::Error, queue: &str) -> QueueError {
    match &err {
        lapin::Error::ProtocolError(amqp)
            if matches!(
                amqp.kind(),
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
            ) =>
        {
            QueueError::ConfigurationConflict {
                queue: queue.to_string(),
                details: amqp.to_string(),
            }
        }
        _ => QueueError::connection(err),
    }
}

impl AmqpSession {
    async fn declare_dead_letter(
        &self,
        queue: &QueueDescriptor,
        arguments: &mut FieldTable,
    ) -> Result<(), QueueError> {
        let Some(dead_letter) = &queue.dead_letter else {
            return Ok(());
        };

        self.channel
            .exchange_declare(
                &dead_letter.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error(e, &dead_letter.exchange))?;

        self.channel
            .queue_declare(
                &dead_letter.queue,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error(e, &dead_letter.queue))?;

        self.channel
            .queue_bind(
                &dead_letter.queue,
                &dead_letter.exchange,
                &dead_letter.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::connection)?;

        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dead_letter.exchange.as_str().into()),
        );
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(dead_letter.routing_key.as_str().into()),
        );

        debug!(
            queue = %queue.name,
            exchange = %dead_letter.exchange,
            dlq = %dead_letter.queue,
            "Dead-letter routing declared"
        );
        Ok(())
    }
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<(), QueueError> {
        let mut arguments = FieldTable::default();
        self.declare_dead_letter(queue, &mut arguments).await?;

        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| declare_error(e, &queue.name))?;

        debug!(queue = %queue.name, durable = queue.durable, "Queue declared");
        Ok(())
    }

    async fn set_prefetch(&self, prefetch: u16) -> Result<(), QueueError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(QueueError::connection)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, QueueError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::connection)?;

        let deliveries = consumer.map(|item| {
            item.map(|delivery| Delivery {
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
                payload: delivery.data,
            })
            .map_err(QueueError::connection)
        });

        Ok(deliveries.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), QueueError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(QueueError::connection)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(QueueError::connection)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(QueueError::connection)
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(QueueError::connection)?
            .await
            .map_err(QueueError::connection)?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.channel.status().connected() {
            self.channel
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(QueueError::connection)?;
        }
        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(QueueError::connection)?;
        }
        Ok(())
    }
}
