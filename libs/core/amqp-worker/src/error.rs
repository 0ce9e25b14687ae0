//! Queue error types
//!
//! Errors fall into two groups:
//! - **Retryable**: connection problems, retried by the consumer's outer loop
//! - **Fatal**: invalid local configuration or a queue declared with
//!   conflicting parameters; retrying with the same configuration cannot succeed

use std::error::Error as StdError;
use thiserror::Error;

/// Error returned by a processor for a single job.
///
/// Every processing error leads to the message being rejected without requeue.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The job could not be handled (downstream failure, provider error, ...).
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// The job decoded but its content is not acceptable.
    #[error("Invalid job: {0}")]
    Invalid(String),
}

impl ProcessingError {
    /// Create a processing failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        ProcessingError::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processing failure that wraps an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ProcessingError::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid-job error.
    pub fn invalid(message: impl Into<String>) -> Self {
        ProcessingError::Invalid(message.into())
    }
}

/// Errors raised by the queue consumer, producer, and broker sessions.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The broker is unreachable, or the connection or channel was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The queue exists with parameters different from the requested ones.
    #[error("Queue '{queue}' exists with conflicting parameters: {details}")]
    ConfigurationConflict { queue: String, details: String },

    /// The processor rejected the job.
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    /// The payload is not a valid JSON document for the job type.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Local configuration is invalid (e.g. prefetch of zero).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded retry policy ran out of attempts.
    #[error("Gave up after {attempts} failed connection attempts")]
    RetriesExhausted { attempts: u32 },
}

impl QueueError {
    /// Create a connection error from anything displayable.
    pub fn connection(message: impl std::fmt::Display) -> Self {
        QueueError::Connection(message.to_string())
    }

    /// Whether the consumer must stop instead of scheduling another attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QueueError::ConfigurationConflict { .. }
                | QueueError::Config(_)
                | QueueError::RetriesExhausted { .. }
        )
    }

    /// Whether this error came from the message itself rather than the broker.
    pub fn is_message_error(&self) -> bool {
        matches!(self, QueueError::Processing(_) | QueueError::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!QueueError::connection("refused").is_fatal());
        assert!(QueueError::Config("prefetch must be at least 1".into()).is_fatal());
        assert!(
            QueueError::ConfigurationConflict {
                queue: "q".into(),
                details: "durable mismatch".into(),
            }
            .is_fatal()
        );
        assert!(QueueError::RetriesExhausted { attempts: 3 }.is_fatal());
        assert!(!QueueError::from(ProcessingError::failed("boom")).is_fatal());
    }

    #[test]
    fn test_message_errors() {
        let decode = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        assert!(QueueError::from(decode).is_message_error());
        assert!(QueueError::from(ProcessingError::invalid("no recipient")).is_message_error());
        assert!(!QueueError::connection("reset").is_message_error());
    }

    #[test]
    fn test_processing_error_keeps_source() {
        let io = std::io::Error::other("smtp timeout");
        let err = ProcessingError::with_source("send failed", io);
        assert_eq!(err.to_string(), "send failed");
        assert!(err.source().is_some());
    }
}
