//! Processor trait for job handling.

use crate::error::ProcessingError;
use crate::registry::Job;
use async_trait::async_trait;

/// Job processor trait.
///
/// The consumer decodes each delivery into `J` and calls `process`. `Ok`
/// acknowledges the message; any `ProcessingError` rejects it without requeue.
///
/// # Example
///
/// ```rust,ignore
/// use amqp_worker::{Processor, ProcessingError};
/// use async_trait::async_trait;
///
/// struct EmailProcessor {
///     provider: Arc<dyn EmailProvider>,
/// }
///
/// #[async_trait]
/// impl Processor<EmailNotification> for EmailProcessor {
///     async fn process(&self, job: &EmailNotification) -> Result<(), ProcessingError> {
///         self.provider
///             .send(job)
///             .await
///             .map_err(|e| ProcessingError::failed(e.to_string()))
///     }
///
///     fn name(&self) -> &'static str {
///         "email_processor"
///     }
/// }
/// ```
#[async_trait]
pub trait Processor<J: Job>: Send + Sync {
    /// Handle one decoded job.
    async fn process(&self, job: &J) -> Result<(), ProcessingError>;

    /// Processor name, used in logs.
    fn name(&self) -> &'static str;

    /// Report downstream availability for the readiness probe.
    async fn health_check(&self) -> Result<bool, ProcessingError> {
        Ok(true)
    }
}

/// A processor that accepts every job.
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

#[async_trait]
impl<J: Job> Processor<J> for NoOpProcessor {
    async fn process(&self, _job: &J) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_processor"
    }
}

/// A processor that rejects every job.
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    message: String,
}

impl FailingProcessor {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl<J: Job> Processor<J> for FailingProcessor {
    async fn process(&self, _job: &J) -> Result<(), ProcessingError> {
        Err(ProcessingError::failed(&self.message))
    }

    fn name(&self) -> &'static str {
        "failing_processor"
    }

    async fn health_check(&self) -> Result<bool, ProcessingError> {
        Ok(false)
    }
}
