//! Publisher → queue → consumer → provider, over the in-memory broker.

use amqp_worker::{
    ConsumerConfig, InMemoryBroker, Outcome, OutcomeCounter, QueueConsumer, QueueDef, RetryPolicy,
};
use async_trait::async_trait;
use domain_notifications::{
    EmailContent, EmailKind, EmailNotification, EmailNotificationProcessor, EmailNotificationQueue,
    EmailProvider, NotificationPublisher, NotificationResult, SentEmail,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

const QUEUE: &str = EmailNotificationQueue::QUEUE_NAME;

#[derive(Default)]
struct RecordingProvider {
    sent: Mutex<Vec<String>>,
}

impl RecordingProvider {
    fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        self.sent.lock().unwrap().push(email.subject.clone());
        Ok(SentEmail {
            message_id: None,
            accepted: true,
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(true)
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

fn consumer(
    broker: &InMemoryBroker,
    provider: Arc<RecordingProvider>,
    counter: &OutcomeCounter,
) -> QueueConsumer<InMemoryBroker, EmailNotification, EmailNotificationProcessor<RecordingProvider>>
{
    QueueConsumer::new(
        broker.clone(),
        EmailNotificationProcessor::with_arc(provider),
        ConsumerConfig::from_def::<EmailNotificationQueue>()
            .with_retry_delay(Duration::from_millis(10)),
        Arc::new(counter.clone()),
    )
}

#[tokio::test]
async fn test_published_notifications_are_sent_in_order() {
    let broker = InMemoryBroker::new();
    let publisher = NotificationPublisher::new(broker.clone(), RetryPolicy::default());
    publisher.producer().connect().await.unwrap();

    for subject in ["uno", "dos", "tres"] {
        publisher
            .queue_email(EmailKind::General, "ana@example.com", subject, "...")
            .await
            .unwrap();
    }

    let provider = Arc::new(RecordingProvider::default());
    let counter = OutcomeCounter::new();
    let consumer = consumer(&broker, Arc::clone(&provider), &counter);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(rx).await });

    eventually("three successes", || counter.get(Outcome::Success, QUEUE) == 3).await;
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(provider.subjects(), vec!["uno", "dos", "tres"]);
    assert_eq!(counter.get(Outcome::Failure, QUEUE), 0);
    assert_eq!(broker.acked_payloads().len(), 3);
    assert!(broker.nacked().is_empty());
    assert_eq!(broker.max_unacked_per_session(), 1);
}

#[tokio::test]
async fn test_bad_messages_are_rejected_and_consumption_continues() {
    let broker = InMemoryBroker::new();
    broker.publish(QUEUE, "not json at all");
    let bad_recipient = EmailNotification::new(EmailKind::Welcome, "nobody", "malo", "...");
    broker.publish(QUEUE, serde_json::to_vec(&bad_recipient).unwrap());
    let good = EmailNotification::new(EmailKind::Welcome, "ana@example.com", "bueno", "...");
    broker.publish(QUEUE, serde_json::to_vec(&good).unwrap());

    let provider = Arc::new(RecordingProvider::default());
    let counter = OutcomeCounter::new();
    let consumer = consumer(&broker, Arc::clone(&provider), &counter);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(rx).await });

    eventually("all three settled", || {
        counter.get(Outcome::Success, QUEUE) + counter.get(Outcome::Failure, QUEUE) == 3
    })
    .await;
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(counter.get(Outcome::Success, QUEUE), 1);
    assert_eq!(counter.get(Outcome::Failure, QUEUE), 2);
    assert_eq!(provider.subjects(), vec!["bueno"]);
    assert_eq!(broker.nacked().len(), 2);
    assert!(broker.nacked().iter().all(|s| !s.requeue));
}
