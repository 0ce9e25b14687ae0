//! Consumer and producer against a real RabbitMQ.
//!
//! Run with `cargo test -p amqp-worker -- --ignored` (needs Docker).

use amqp_worker::{
    AmqpBroker, Broker, ConsumerConfig, NoOpProcessor, Outcome, OutcomeCounter, QueueConsumer,
    QueueDescriptor, QueueError, QueueProducer, RetryPolicy, Session,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRabbitMq};
use tokio::sync::watch;

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_consumer_acks_and_rejects_against_rabbitmq() {
    let rabbitmq = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("test_consumer_acks_and_rejects_against_rabbitmq");
    let queue = builder.queue_name("emails");
    let broker = AmqpBroker::new(rabbitmq.amqp_url());

    let producer = QueueProducer::new(
        broker.clone(),
        QueueDescriptor::durable(&queue),
        RetryPolicy::default(),
    );
    producer.connect().await.unwrap();
    producer
        .publish(&json!({"id": builder.message_id(), "to": builder.email("ana")}))
        .await
        .unwrap();

    // Raw non-JSON body goes through a session directly.
    let session = broker.connect().await.unwrap();
    session.publish(&queue, b"not json").await.unwrap();

    let counter = OutcomeCounter::new();
    let consumer: QueueConsumer<_, Value, _> = QueueConsumer::new(
        broker.clone(),
        NoOpProcessor,
        ConsumerConfig::new(&queue).with_retry_delay(Duration::from_millis(200)),
        Arc::new(counter.clone()),
    );
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(rx).await });

    eventually("both outcomes", || {
        counter.get(Outcome::Success, &queue) == 1 && counter.get(Outcome::Failure, &queue) == 1
    })
    .await;

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    session.close().await.unwrap();
    producer.close().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redeclare_with_other_durability_conflicts() {
    let rabbitmq = TestRabbitMq::new().await;
    let queue = TestDataBuilder::from_test_name("test_redeclare_with_other_durability_conflicts")
        .queue_name("jobs");
    let broker = AmqpBroker::new(rabbitmq.amqp_url());

    let session = broker.connect().await.unwrap();
    session
        .declare_queue(&QueueDescriptor::new(&queue, false))
        .await
        .unwrap();

    let consumer: QueueConsumer<_, Value, _> = QueueConsumer::new(
        broker,
        NoOpProcessor,
        ConsumerConfig::new(&queue),
        Arc::new(OutcomeCounter::new()),
    );
    let (_tx, rx) = watch::channel(false);
    let result = tokio::time::timeout(Duration::from_secs(30), consumer.run(rx))
        .await
        .unwrap();

    assert!(matches!(result, Err(QueueError::ConfigurationConflict { .. })));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_dead_letter_queue_receives_rejected_messages() {
    let rabbitmq = TestRabbitMq::new().await;
    let queue = TestDataBuilder::from_test_name("test_dead_letter_queue_receives_rejected_messages")
        .queue_name("orders");
    let broker = AmqpBroker::new(rabbitmq.amqp_url());

    let config = ConsumerConfig::new(&queue).with_dead_letter_exchange("test.dlx");
    let session = broker.connect().await.unwrap();
    session.declare_queue(&config.queue).await.unwrap();
    session.publish(&queue, b"{broken").await.unwrap();

    let counter = OutcomeCounter::new();
    let consumer: QueueConsumer<_, Value, _> =
        QueueConsumer::new(broker.clone(), NoOpProcessor, config, Arc::new(counter.clone()));
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(rx).await });

    eventually("rejection", || counter.get(Outcome::Failure, &queue) == 1).await;
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let dead_letters = session
        .consume(&format!("{}_dlq", queue), "dlq-reader")
        .await
        .unwrap();
    let first = tokio::time::timeout(
        Duration::from_secs(10),
        futures::StreamExt::into_future(dead_letters),
    )
    .await
    .unwrap()
    .0
    .unwrap()
    .unwrap();
    assert_eq!(first.payload, b"{broken");
    session.close().await.unwrap();
}
