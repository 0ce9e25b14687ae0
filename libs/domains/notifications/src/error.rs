//! Error types for the notifications domain.

use amqp_worker::QueueError;
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// Email provider error.
    #[error("Email provider error: {0}")]
    ProviderError(String),

    /// The notification could not be enqueued.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
