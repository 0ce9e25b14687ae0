//! Email processor for the notification queue consumer.
//!
//! `EmailNotificationProcessor` implements `Processor<EmailNotification>`:
//! it checks the recipient, builds the email and hands it to the provider.

use crate::models::EmailNotification;
use crate::providers::{EmailContent, EmailProvider};
use amqp_worker::{ProcessingError, Processor};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

pub struct EmailNotificationProcessor<P: EmailProvider> {
    provider: Arc<P>,
}

impl<P: EmailProvider + 'static> EmailNotificationProcessor<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    pub fn with_arc(provider: Arc<P>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P: EmailProvider + 'static> Processor<EmailNotification> for EmailNotificationProcessor<P> {
    async fn process(&self, job: &EmailNotification) -> Result<(), ProcessingError> {
        info!(
            job_id = %job.id,
            kind = %job.kind,
            to = %job.to,
            "Processing email notification"
        );

        if job.validate().is_err() {
            warn!(job_id = %job.id, to = %job.to, "Rejecting notification with invalid recipient");
            return Err(ProcessingError::invalid(format!(
                "invalid recipient address '{}'",
                job.to
            )));
        }

        let email = EmailContent {
            to_email: job.to.clone(),
            subject: job.subject.clone(),
            text_body: job.body.clone(),
            reply_to: None,
        };

        let sent = self
            .provider
            .send(&email)
            .await
            .map_err(|e| ProcessingError::with_source("email provider failed", e))?;

        if !sent.accepted {
            return Err(ProcessingError::failed(format!(
                "provider {} did not accept the email",
                self.provider.name()
            )));
        }

        info!(
            job_id = %job.id,
            provider = self.provider.name(),
            message_id = ?sent.message_id,
            "Successfully sent email"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "EmailNotificationProcessor"
    }

    async fn health_check(&self) -> Result<bool, ProcessingError> {
        self.provider
            .health_check()
            .await
            .map_err(|e| ProcessingError::with_source("email provider health check failed", e))
    }
}

impl<P: EmailProvider> Clone for EmailNotificationProcessor<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotificationError;
    use crate::models::EmailKind;
    use crate::providers::{MockEmailProvider, SentEmail};

    fn notification(to: &str) -> EmailNotification {
        EmailNotification::new(EmailKind::Welcome, to, "Bienvenida", "Hola")
    }

    fn mock_provider() -> MockEmailProvider {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("mock");
        provider
    }

    #[tokio::test]
    async fn test_sends_email_through_provider() {
        let mut provider = mock_provider();
        provider
            .expect_send()
            .withf(|email| email.to_email == "ana@example.com" && email.subject == "Bienvenida")
            .times(1)
            .returning(|_| {
                Ok(SentEmail {
                    message_id: Some("m-1".into()),
                    accepted: true,
                })
            });

        let processor = EmailNotificationProcessor::new(provider);
        processor.process(&notification("ana@example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_not_sent() {
        let mut provider = mock_provider();
        provider.expect_send().never();

        let processor = EmailNotificationProcessor::new(provider);
        let err = processor.process(&notification("not-an-address")).await.unwrap_err();

        assert!(matches!(err, ProcessingError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_provider_error_fails_processing() {
        let mut provider = mock_provider();
        provider
            .expect_send()
            .times(1)
            .returning(|_| Err(NotificationError::ProviderError("smtp timeout".into())));

        let processor = EmailNotificationProcessor::new(provider);
        let err = processor.process(&notification("ana@example.com")).await.unwrap_err();

        assert!(matches!(err, ProcessingError::Failed { .. }));
        assert_eq!(err.to_string(), "email provider failed");
    }

    #[tokio::test]
    async fn test_unaccepted_email_fails_processing() {
        let mut provider = mock_provider();
        provider.expect_send().returning(|_| {
            Ok(SentEmail {
                message_id: None,
                accepted: false,
            })
        });

        let processor = EmailNotificationProcessor::new(provider);
        let err = processor.process(&notification("ana@example.com")).await.unwrap_err();

        assert!(err.to_string().contains("did not accept"));
    }

    #[tokio::test]
    async fn test_health_check_follows_provider() {
        let mut provider = mock_provider();
        provider.expect_health_check().returning(|| Ok(false));

        let processor = EmailNotificationProcessor::new(provider);
        assert!(!processor.health_check().await.unwrap());
        assert_eq!(
            Processor::<EmailNotification>::name(&processor),
            "EmailNotificationProcessor"
        );
    }
}
