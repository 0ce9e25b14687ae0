//! Queue producer for job enqueuing.
//!
//! Keeps one broker session alive in the background (`run`) and publishes
//! persistent JSON messages to a single queue through it.
//!
//! # Example
//!
//! ```rust,ignore
//! use amqp_worker::{AmqpBroker, QueueProducer, RetryPolicy};
//!
//! let producer = QueueProducer::from_def::<EmailNotificationQueue>(
//!     AmqpBroker::new(&amqp.url),
//!     RetryPolicy::default(),
//! );
//! tokio::spawn({
//!     let producer = producer.clone();
//!     async move { producer.run(shutdown_rx).await }
//! });
//!
//! producer.publish(&notification).await?;
//! ```

use crate::broker::{Broker, Session};
use crate::config::QueueDescriptor;
use crate::consumer::shutdown_requested;
use crate::error::QueueError;
use crate::registry::QueueDef;
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

/// How often a connected producer checks that its session is still open.
const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

struct ProducerInner<B: Broker> {
    broker: B,
    queue: QueueDescriptor,
    retry: RetryPolicy,
    session: RwLock<Option<Arc<B::Session>>>,
}

/// Publisher for one queue. Clones share the same session.
pub struct QueueProducer<B: Broker> {
    inner: Arc<ProducerInner<B>>,
}

impl<B: Broker> Clone for QueueProducer<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Broker> QueueProducer<B> {
    pub fn new(broker: B, queue: QueueDescriptor, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                broker,
                queue,
                retry,
                session: RwLock::new(None),
            }),
        }
    }

    /// Create a producer from a `QueueDef`, so it declares the queue exactly
    /// like the consumer does.
    pub fn from_def<Q: QueueDef>(broker: B, retry: RetryPolicy) -> Self {
        Self::new(broker, Q::descriptor(), retry)
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.queue.name
    }

    /// Whether a live session is available for publishing.
    pub async fn is_connected(&self) -> bool {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.is_connected())
    }

    /// Open a session and declare the queue. One attempt, no retry.
    pub async fn connect(&self) -> Result<(), QueueError> {
        let session = self.inner.broker.connect().await?;
        if let Err(e) = session.declare_queue(&self.inner.queue).await {
            if let Err(close_err) = session.close().await {
                debug!(error = %close_err, "Closing session after failed declare");
            }
            return Err(e);
        }

        let previous = self
            .inner
            .session
            .write()
            .await
            .replace(Arc::new(session));
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                debug!(error = %e, "Closing replaced producer session failed");
            }
        }

        info!(queue = %self.queue_name(), "Producer connected");
        Ok(())
    }

    /// Keep the session alive until `shutdown` turns true.
    ///
    /// Reconnects with the retry policy whenever the session is lost. Returns
    /// `Err` only for fatal errors or when a bounded policy is exhausted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = if self.is_connected().await {
                CONNECTION_CHECK_INTERVAL
            } else {
                match self.connect().await {
                    Ok(()) => {
                        failures = 0;
                        CONNECTION_CHECK_INTERVAL
                    }
                    Err(e) if e.is_fatal() => {
                        error!(queue = %self.queue_name(), error = %e, "Producer cannot continue");
                        return Err(e);
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(
                            queue = %self.queue_name(),
                            attempt = failures,
                            error = %e,
                            "Producer failed to connect to AMQP broker"
                        );
                        if !self.inner.retry.allows_retry(failures) {
                            return Err(QueueError::RetriesExhausted { attempts: failures });
                        }
                        self.inner.retry.delay_after(failures)
                    }
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        self.close().await;
        info!(queue = %self.queue_name(), "Producer stopped");
        Ok(())
    }

    /// Serialize `job` as JSON and publish it as a persistent message.
    ///
    /// Fails with `QueueError::Connection` while no session is available.
    pub async fn publish<J: Serialize>(&self, job: &J) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job)?;

        let session = self
            .inner
            .session
            .read()
            .await
            .clone()
            .filter(|s| s.is_connected())
            .ok_or_else(|| QueueError::connection("producer is not connected"))?;

        session.publish(&self.inner.queue.name, &payload).await?;

        debug!(queue = %self.queue_name(), bytes = payload.len(), "Published message");
        Ok(())
    }

    /// Drop the current session, closing it.
    pub async fn close(&self) {
        let session = self.inner.session.write().await.take();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!(error = %e, "Failed to close producer session");
            }
        }
    }
}
