//! Reliable queue consumer.
//!
//! `QueueConsumer::run` owns the whole lifecycle:
//! 1. connect, declare the queue, apply prefetch and subscribe
//! 2. for every delivery: decode JSON, process, then ack on success or
//!    reject without requeue on any error, and only then count the outcome;
//!    the processor's health check is re-run every `health_check_interval`
//! 3. on connection loss or a failed connection attempt, wait for the retry
//!    delay and start over; unacked deliveries are redelivered by the broker
//! 4. on shutdown, cancel the subscription, let in-flight deliveries settle
//!    and close the session
//!
//! Configuration conflicts and invalid local configuration stop the consumer
//! instead of being retried.

use crate::broker::{Broker, Delivery, DeliveryStream, Session};
use crate::config::ConsumerConfig;
use crate::error::QueueError;
use crate::health::HealthState;
use crate::metrics::{Outcome, OutcomeSink};
use crate::processor::Processor;
use crate::registry::Job;
use futures::StreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How a subscription ended.
enum SessionEnd {
    Shutdown,
    Lost(QueueError),
}

/// Resolves once shutdown is requested or the shutdown sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Consumer for one queue.
///
/// # Example
///
/// ```rust,ignore
/// use amqp_worker::{AmqpBroker, ConsumerConfig, PrometheusOutcomeSink, QueueConsumer};
///
/// let consumer = QueueConsumer::new(
///     AmqpBroker::new(&amqp.url),
///     EmailNotificationProcessor::new(provider),
///     ConsumerConfig::from_def::<EmailNotificationQueue>(),
///     Arc::new(PrometheusOutcomeSink::new(registry.clone())),
/// );
///
/// let (tx, rx) = tokio::sync::watch::channel(false);
/// consumer.run(rx).await?;
/// ```
pub struct QueueConsumer<B, J, P>
where
    B: Broker,
    J: Job,
    P: Processor<J> + 'static,
{
    broker: B,
    processor: Arc<P>,
    config: ConsumerConfig,
    sink: Arc<dyn OutcomeSink>,
    health: Option<HealthState>,
    _job: PhantomData<fn() -> J>,
}

impl<B, J, P> QueueConsumer<B, J, P>
where
    B: Broker,
    J: Job,
    P: Processor<J> + 'static,
{
    pub fn new(broker: B, processor: P, config: ConsumerConfig, sink: Arc<dyn OutcomeSink>) -> Self {
        Self::with_arc_processor(broker, Arc::new(processor), config, sink)
    }

    /// Create a consumer that shares an existing processor.
    pub fn with_arc_processor(
        broker: B,
        processor: Arc<P>,
        config: ConsumerConfig,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            broker,
            processor,
            config,
            sink,
            health: None,
            _job: PhantomData,
        }
    }

    /// Report connection and processor state to `health`.
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Consume until `shutdown` turns true (or its sender is dropped).
    ///
    /// Returns `Ok(())` after a graceful shutdown and `Err` only for errors
    /// that retrying cannot fix.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        if let Err(e) = self.config.validate() {
            error!(queue = %self.config.queue_name(), error = %e, "Invalid consumer configuration");
            return Err(e);
        }

        info!(
            queue = %self.config.queue_name(),
            durable = self.config.queue.durable,
            prefetch = self.config.prefetch,
            processor = self.processor.name(),
            "Starting queue consumer"
        );

        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_subscribe().await {
                Ok((session, deliveries)) => {
                    failures = 0;
                    self.mark_connected().await;
                    info!(
                        queue = %self.config.queue_name(),
                        consumer_tag = %self.config.consumer_tag,
                        "Subscribed, waiting for messages"
                    );

                    let end = self.consume(&session, deliveries, &mut shutdown).await;
                    self.set_connected(false).await;

                    match end {
                        SessionEnd::Shutdown => {
                            if let Err(e) = session.close().await {
                                warn!(error = %e, "Failed to close broker session");
                            }
                            break;
                        }
                        SessionEnd::Lost(e) => {
                            warn!(
                                queue = %self.config.queue_name(),
                                error = %e,
                                "Broker connection lost, unacked messages will be redelivered"
                            );
                            if let Err(close_err) = session.close().await {
                                debug!(error = %close_err, "Closing lost session failed");
                            }
                            self.set_error(&e).await;
                            failures = 1;
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        queue = %self.config.queue_name(),
                        error = %e,
                        "Consumer cannot continue"
                    );
                    self.set_error(&e).await;
                    return Err(e);
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        queue = %self.config.queue_name(),
                        attempt = failures,
                        error = %e,
                        "Failed to connect to AMQP broker"
                    );
                    self.set_error(&e).await;
                }
            }

            if !self.config.retry.allows_retry(failures) {
                let e = QueueError::RetriesExhausted { attempts: failures };
                error!(queue = %self.config.queue_name(), error = %e, "Giving up");
                return Err(e);
            }

            let delay = self.config.retry.delay_after(failures);
            info!(
                queue = %self.config.queue_name(),
                delay_ms = delay.as_millis() as u64,
                "Retrying connection"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!(queue = %self.config.queue_name(), "Queue consumer stopped");
        Ok(())
    }

    async fn connect_and_subscribe(&self) -> Result<(Arc<B::Session>, DeliveryStream), QueueError> {
        let session = Arc::new(self.broker.connect().await?);

        match self.subscribe(&session).await {
            Ok(deliveries) => Ok((session, deliveries)),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!(error = %close_err, "Closing session after failed subscribe");
                }
                Err(e)
            }
        }
    }

    async fn subscribe(&self, session: &B::Session) -> Result<DeliveryStream, QueueError> {
        session.declare_queue(&self.config.queue).await?;
        session.set_prefetch(self.config.prefetch).await?;
        session
            .consume(&self.config.queue.name, &self.config.consumer_tag)
            .await
    }

    async fn consume(
        &self,
        session: &Arc<B::Session>,
        mut deliveries: DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let queue: Arc<str> = Arc::from(self.config.queue_name());
        let mut in_flight = JoinSet::new();

        let period = self.config.health_check_interval;
        let mut health_checks = tokio::time::interval_at(Instant::now() + period, period);
        health_checks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(shutdown) => break SessionEnd::Shutdown,

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(queue = %queue, error = %e, "Delivery handler panicked");
                    }
                }

                _ = health_checks.tick(), if self.health.is_some() => {
                    self.refresh_processor_health().await;
                }

                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        in_flight.spawn(handle_delivery::<B::Session, J, P>(
                            Arc::clone(session),
                            Arc::clone(&self.processor),
                            Arc::clone(&self.sink),
                            Arc::clone(&queue),
                            delivery,
                        ));
                    }
                    Some(Err(e)) => break SessionEnd::Lost(e),
                    None => break SessionEnd::Lost(QueueError::connection("delivery stream ended")),
                },
            }
        };

        drop(deliveries);

        match end {
            SessionEnd::Shutdown => {
                if let Err(e) = session.cancel(&self.config.consumer_tag).await {
                    warn!(error = %e, "Failed to cancel subscription");
                }
                if !in_flight.is_empty() {
                    info!(
                        queue = %queue,
                        pending = in_flight.len(),
                        "Waiting for in-flight messages"
                    );
                }
                while let Some(joined) = in_flight.join_next().await {
                    if let Err(e) = joined {
                        error!(queue = %queue, error = %e, "Delivery handler panicked");
                    }
                }
            }
            SessionEnd::Lost(_) => {
                // Their acks cannot reach the broker any more.
                in_flight.shutdown().await;
            }
        }

        end
    }

    async fn mark_connected(&self) {
        if let Some(health) = &self.health {
            health.set_broker_connected(true).await;
            health.set_error(None).await;
        }
        self.refresh_processor_health().await;
    }

    async fn refresh_processor_health(&self) {
        let Some(health) = &self.health else {
            return;
        };
        let healthy = match self.processor.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(processor = self.processor.name(), error = %e, "Processor health check failed");
                false
            }
        };
        health.set_processor_healthy(healthy).await;
    }

    async fn set_connected(&self, connected: bool) {
        if let Some(health) = &self.health {
            health.set_broker_connected(connected).await;
        }
    }

    async fn set_error(&self, error: &QueueError) {
        if let Some(health) = &self.health {
            health.set_error(Some(error.to_string())).await;
        }
    }
}

/// Decode, process and settle one delivery, then count its outcome.
///
/// The outcome is counted only once the broker accepted the ack or nack; a
/// delivery whose settlement fails is redelivered and counted then.
async fn handle_delivery<S, J, P>(
    session: Arc<S>,
    processor: Arc<P>,
    sink: Arc<dyn OutcomeSink>,
    queue: Arc<str>,
    delivery: Delivery,
) where
    S: Session,
    J: Job,
    P: Processor<J>,
{
    let tag = delivery.delivery_tag;

    let settled = match decode_and_process::<J, P>(&*processor, &delivery.payload).await {
        Ok(job_id) => {
            debug!(queue = %queue, delivery_tag = tag, job_id = %job_id, "Message processed");
            session.ack(tag).await.map(|_| Outcome::Success)
        }
        Err(e) => {
            warn!(
                queue = %queue,
                delivery_tag = tag,
                redelivered = delivery.redelivered,
                error = %e,
                "Message rejected"
            );
            session.nack(tag, false).await.map(|_| Outcome::Failure)
        }
    };

    match settled {
        Ok(outcome) => sink.record(outcome, &queue),
        Err(e) => warn!(
            queue = %queue,
            delivery_tag = tag,
            error = %e,
            "Failed to settle delivery, broker will redeliver it"
        ),
    }
}

async fn decode_and_process<J, P>(processor: &P, payload: &[u8]) -> Result<String, QueueError>
where
    J: Job,
    P: Processor<J>,
{
    let job: J = serde_json::from_slice(payload)?;
    processor.process(&job).await?;
    Ok(job.job_id())
}
