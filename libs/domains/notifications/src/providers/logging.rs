use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::NotificationResult;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Provider that writes every email to the log instead of delivering it.
///
/// Default provider of the notifications service; delivery integrations
/// plug in behind the same trait.
#[derive(Debug, Clone, Default)]
pub struct LogProvider;

impl LogProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailProvider for LogProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        let message_id = Uuid::new_v4().to_string();
        info!(
            provider = self.name(),
            message_id = %message_id,
            to = %email.to_email,
            subject = %email.subject,
            bytes = email.text_body.len(),
            "Email sent"
        );

        Ok(SentEmail {
            message_id: Some(message_id),
            accepted: true,
        })
    }

    fn name(&self) -> &'static str {
        "log"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_provider_accepts_everything() {
        let provider = LogProvider::new();
        let sent = provider
            .send(&EmailContent {
                to_email: "ana@example.com".into(),
                subject: "Hola".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(sent.accepted);
        assert!(sent.message_id.is_some());
        assert!(provider.health_check().await.unwrap());
    }
}
