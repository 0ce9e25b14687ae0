//! In-memory broker.
//!
//! Behaves like a single RabbitMQ node for the parts the consumer relies on:
//! durable/non-durable queue declaration with conflict detection, per-channel
//! prefetch, manual ack/nack, requeue of unacked deliveries when a channel
//! closes, and dead-letter routing of rejected messages. It also records what
//! happened (connection attempts, subscriptions, settlements) so tests can
//! assert on it.

use crate::broker::{Broker, Delivery, DeliveryStream, Session};
use crate::config::{DeadLetterConfig, QueueDescriptor};
use crate::error::QueueError;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone)]
struct Message {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct QueueState {
    durable: bool,
    dead_letter: Option<DeadLetterConfig>,
    ready: VecDeque<Message>,
}

#[derive(Debug)]
struct Unacked {
    session: u64,
    queue: String,
    message: Message,
}

#[derive(Debug, Default)]
struct SessionState {
    open: bool,
    prefetch: u16,
    cancelled: HashSet<String>,
}

/// A delivery that was acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub delivery_tag: u64,
    pub queue: String,
    pub payload: Vec<u8>,
    pub acked: bool,
    pub requeue: bool,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, QueueState>,
    unacked: BTreeMap<u64, Unacked>,
    sessions: HashMap<u64, SessionState>,
    settlements: Vec<Settlement>,
    next_tag: u64,
    next_session: u64,
    refused_connections: u32,
    connect_attempts: u32,
    subscriptions: u32,
    deliveries: u64,
    max_unacked_per_session: usize,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

enum Next {
    Deliver(Delivery),
    Wait,
    Cancelled,
    Closed,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.notify.notify_waiters();
    }

    fn next_delivery(&self, session: u64, queue: &str, consumer_tag: &str) -> Next {
        let mut state = self.lock();

        let prefetch = match state.sessions.get(&session) {
            Some(s) if !s.open => return Next::Closed,
            Some(s) if s.cancelled.contains(consumer_tag) => return Next::Cancelled,
            Some(s) => usize::from(s.prefetch),
            None => return Next::Closed,
        };

        let outstanding = state
            .unacked
            .values()
            .filter(|u| u.session == session)
            .count();
        if prefetch > 0 && outstanding >= prefetch {
            return Next::Wait;
        }

        let Some(message) = state.queues.get_mut(queue).and_then(|q| q.ready.pop_front()) else {
            return Next::Wait;
        };

        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state.deliveries += 1;
        state.max_unacked_per_session = state.max_unacked_per_session.max(outstanding + 1);
        state.unacked.insert(
            delivery_tag,
            Unacked {
                session,
                queue: queue.to_string(),
                message: message.clone(),
            },
        );

        Next::Deliver(Delivery {
            delivery_tag,
            redelivered: message.redelivered,
            payload: message.payload,
        })
    }
}

fn ensure_open(state: &State, session: u64) -> Result<(), QueueError> {
    match state.sessions.get(&session) {
        Some(s) if s.open => Ok(()),
        _ => Err(QueueError::connection("channel is closed")),
    }
}

fn declare(state: &mut State, queue: &QueueDescriptor) -> Result<(), QueueError> {
    if let Some(existing) = state.queues.get(&queue.name) {
        if existing.durable != queue.durable {
            return Err(QueueError::ConfigurationConflict {
                queue: queue.name.clone(),
                details: format!(
                    "declared with durable={}, requested durable={}",
                    existing.durable, queue.durable
                ),
            });
        }
        if existing.dead_letter != queue.dead_letter {
            return Err(QueueError::ConfigurationConflict {
                queue: queue.name.clone(),
                details: "dead-letter arguments differ from the existing queue".into(),
            });
        }
        return Ok(());
    }

    if let Some(dead_letter) = &queue.dead_letter {
        state
            .queues
            .entry(dead_letter.queue.clone())
            .or_insert_with(|| QueueState {
                durable: queue.durable,
                dead_letter: None,
                ready: VecDeque::new(),
            });
    }

    state.queues.insert(
        queue.name.clone(),
        QueueState {
            durable: queue.durable,
            dead_letter: queue.dead_letter.clone(),
            ready: VecDeque::new(),
        },
    );
    Ok(())
}

/// Close a session and put its unacked deliveries back at the head of their
/// queues, flagged as redelivered, in their original order.
fn release_session(state: &mut State, session: u64) {
    if let Some(s) = state.sessions.get_mut(&session) {
        s.open = false;
    }

    let tags: Vec<u64> = state
        .unacked
        .iter()
        .filter(|(_, u)| u.session == session)
        .map(|(tag, _)| *tag)
        .collect();

    for tag in tags.into_iter().rev() {
        let Some(unacked) = state.unacked.remove(&tag) else {
            continue;
        };
        if let Some(queue) = state.queues.get_mut(&unacked.queue) {
            queue.ready.push_front(Message {
                payload: unacked.message.payload,
                redelivered: true,
            });
        }
    }
}

/// In-memory broker handle. Clones share the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `attempts` connection attempts.
    pub fn refuse_connections(&self, attempts: u32) {
        self.shared.lock().refused_connections = attempts;
    }

    /// Declare a queue directly on the broker.
    pub fn declare(&self, name: &str, durable: bool) -> Result<(), QueueError> {
        declare(&mut self.shared.lock(), &QueueDescriptor::new(name, durable))
    }

    /// Publish a message directly to a queue. A missing queue is created as
    /// durable without dead-letter routing.
    pub fn publish(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        {
            let mut state = self.shared.lock();
            let entry = state
                .queues
                .entry(queue.to_string())
                .or_insert_with(|| QueueState {
                    durable: true,
                    dead_letter: None,
                    ready: VecDeque::new(),
                });
            entry.ready.push_back(Message {
                payload: payload.into(),
                redelivered: false,
            });
        }
        self.shared.wake();
    }

    /// Drop every open connection, as if the broker restarted.
    pub fn disconnect(&self) {
        {
            let mut state = self.shared.lock();
            let open: Vec<u64> = state
                .sessions
                .iter()
                .filter(|(_, s)| s.open)
                .map(|(id, _)| *id)
                .collect();
            for id in open {
                release_session(&mut state, id);
            }
        }
        self.shared.wake();
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.lock().connect_attempts
    }

    /// Number of successful `consume` calls.
    pub fn subscriptions(&self) -> u32 {
        self.shared.lock().subscriptions
    }

    /// Total deliveries handed out, redeliveries included.
    pub fn deliveries(&self) -> u64 {
        self.shared.lock().deliveries
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.lock().sessions.values().filter(|s| s.open).count()
    }

    /// Messages waiting in `queue`.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Payloads waiting in `queue`, head first.
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries handed out and not yet settled, across all sessions.
    pub fn unacked_count(&self) -> usize {
        self.shared.lock().unacked.len()
    }

    /// Highest number of unacked deliveries any single session ever held.
    pub fn max_unacked_per_session(&self) -> usize {
        self.shared.lock().max_unacked_per_session
    }

    /// Durability of a declared queue.
    pub fn queue_durability(&self, queue: &str) -> Option<bool> {
        self.shared.lock().queues.get(queue).map(|q| q.durable)
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.shared.lock().settlements.clone()
    }

    /// Payloads of acked deliveries, in ack order.
    pub fn acked_payloads(&self) -> Vec<Vec<u8>> {
        self.settlements()
            .into_iter()
            .filter(|s| s.acked)
            .map(|s| s.payload)
            .collect()
    }

    /// Nacked deliveries, in nack order.
    pub fn nacked(&self) -> Vec<Settlement> {
        self.settlements().into_iter().filter(|s| !s.acked).collect()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    type Session = InMemorySession;

    async fn connect(&self) -> Result<InMemorySession, QueueError> {
        let mut state = self.shared.lock();
        state.connect_attempts += 1;

        if state.refused_connections > 0 {
            state.refused_connections -= 1;
            return Err(QueueError::connection("connection refused"));
        }

        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(
            id,
            SessionState {
                open: true,
                ..Default::default()
            },
        );
        debug!(session = id, "In-memory session opened");

        Ok(InMemorySession {
            id,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Session on an `InMemoryBroker`.
pub struct InMemorySession {
    id: u64,
    shared: Arc<Shared>,
}

impl InMemorySession {
    fn settle(&self, delivery_tag: u64, acked: bool, requeue: bool) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock();
            ensure_open(&state, self.id)?;

            let owned = state
                .unacked
                .get(&delivery_tag)
                .is_some_and(|u| u.session == self.id);
            let Some(unacked) = owned
                .then(|| state.unacked.remove(&delivery_tag))
                .flatten()
            else {
                return Err(QueueError::connection(format!(
                    "unknown delivery tag {}",
                    delivery_tag
                )));
            };

            if !acked {
                let dead_letter = state
                    .queues
                    .get(&unacked.queue)
                    .and_then(|q| q.dead_letter.clone());
                let message = Message {
                    payload: unacked.message.payload.clone(),
                    redelivered: requeue,
                };
                match (requeue, dead_letter) {
                    (true, _) => {
                        if let Some(q) = state.queues.get_mut(&unacked.queue) {
                            q.ready.push_front(message);
                        }
                    }
                    (false, Some(dl)) => {
                        if let Some(q) = state.queues.get_mut(&dl.queue) {
                            q.ready.push_back(message);
                        }
                    }
                    (false, None) => {}
                }
            }

            state.settlements.push(Settlement {
                delivery_tag,
                queue: unacked.queue,
                payload: unacked.message.payload,
                acked,
                requeue,
            });
        }
        self.shared.wake();
        Ok(())
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn declare_queue(&self, queue: &QueueDescriptor) -> Result<(), QueueError> {
        let mut state = self.shared.lock();
        ensure_open(&state, self.id)?;
        declare(&mut state, queue)
    }

    async fn set_prefetch(&self, prefetch: u16) -> Result<(), QueueError> {
        let mut state = self.shared.lock();
        ensure_open(&state, self.id)?;
        if let Some(session) = state.sessions.get_mut(&self.id) {
            session.prefetch = prefetch;
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, QueueError> {
        {
            let mut state = self.shared.lock();
            ensure_open(&state, self.id)?;
            if !state.queues.contains_key(queue) {
                return Err(QueueError::connection(format!("no queue '{}'", queue)));
            }
            state.subscriptions += 1;
        }

        let shared = Arc::clone(&self.shared);
        let session = self.id;
        let queue = queue.to_string();
        let consumer_tag = consumer_tag.to_string();

        let deliveries = async_stream::stream! {
            loop {
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match shared.next_delivery(session, &queue, &consumer_tag) {
                    Next::Deliver(delivery) => {
                        yield Ok(delivery);
                    }
                    Next::Wait => notified.await,
                    Next::Cancelled => break,
                    Next::Closed => {
                        yield Err(QueueError::connection("connection closed by broker"));
                        break;
                    }
                }
            }
        };

        Ok(deliveries.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock();
            ensure_open(&state, self.id)?;
            if let Some(session) = state.sessions.get_mut(&self.id) {
                session.cancelled.insert(consumer_tag.to_string());
            }
        }
        self.shared.wake();
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError> {
        self.settle(delivery_tag, true, false)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError> {
        self.settle(delivery_tag, false, requeue)
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock();
            ensure_open(&state, self.id)?;
            match state.queues.get_mut(queue) {
                Some(q) => q.ready.push_back(Message {
                    payload: payload.to_vec(),
                    redelivered: false,
                }),
                None => debug!(queue, "Unroutable message dropped"),
            }
        }
        self.shared.wake();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        ensure_open(&self.shared.lock(), self.id).is_ok()
    }

    async fn close(&self) -> Result<(), QueueError> {
        release_session(&mut self.shared.lock(), self.id);
        self.shared.wake();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next(deliveries: &mut DeliveryStream) -> Option<Delivery> {
        tokio::time::timeout(Duration::from_millis(50), deliveries.next())
            .await
            .ok()
            .flatten()
            .and_then(Result::ok)
    }

    #[tokio::test]
    async fn test_declare_is_idempotent_and_detects_conflicts() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();

        let durable = QueueDescriptor::durable("jobs");
        session.declare_queue(&durable).await.unwrap();
        session.declare_queue(&durable).await.unwrap();
        assert_eq!(broker.queue_durability("jobs"), Some(true));

        let err = session
            .declare_queue(&QueueDescriptor::new("jobs", false))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::ConfigurationConflict { ref queue, .. } if queue == "jobs"));
    }

    #[tokio::test]
    async fn test_prefetch_bounds_outstanding_deliveries() {
        let broker = InMemoryBroker::new();
        for i in 0..3 {
            broker.publish("jobs", format!("{}", i));
        }

        let session = broker.connect().await.unwrap();
        session.set_prefetch(2).await.unwrap();
        let mut deliveries = session.consume("jobs", "c1").await.unwrap();

        let first = next(&mut deliveries).await.unwrap();
        let _second = next(&mut deliveries).await.unwrap();
        assert!(next(&mut deliveries).await.is_none());

        session.ack(first.delivery_tag).await.unwrap();
        let third = next(&mut deliveries).await.unwrap();
        assert_eq!(third.payload, b"2");
        assert_eq!(broker.max_unacked_per_session(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_requeues_unacked_as_redelivered() {
        let broker = InMemoryBroker::new();
        broker.publish("jobs", "a");
        broker.publish("jobs", "b");

        let session = broker.connect().await.unwrap();
        let mut deliveries = session.consume("jobs", "c1").await.unwrap();
        let first = next(&mut deliveries).await.unwrap();
        assert!(!first.redelivered);

        broker.disconnect();
        let closed = deliveries.next().await.unwrap();
        assert!(matches!(closed, Err(QueueError::Connection(_))));
        assert!(session.ack(first.delivery_tag).await.is_err());
        assert!(!session.is_connected());

        let session = broker.connect().await.unwrap();
        let mut deliveries = session.consume("jobs", "c2").await.unwrap();
        let again = next(&mut deliveries).await.unwrap();
        assert_eq!(again.payload, b"a");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_discards_or_dead_letters() {
        let broker = InMemoryBroker::new();
        let session = broker.connect().await.unwrap();
        session
            .declare_queue(&QueueDescriptor::durable("plain"))
            .await
            .unwrap();
        session
            .declare_queue(&QueueDescriptor::durable("routed").with_dead_letter("dlx"))
            .await
            .unwrap();
        broker.publish("plain", "x");
        broker.publish("routed", "y");

        let mut plain = session.consume("plain", "c1").await.unwrap();
        let delivery = next(&mut plain).await.unwrap();
        session.nack(delivery.delivery_tag, false).await.unwrap();
        assert_eq!(broker.ready_count("plain"), 0);

        let mut routed = session.consume("routed", "c2").await.unwrap();
        let delivery = next(&mut routed).await.unwrap();
        session.nack(delivery.delivery_tag, false).await.unwrap();
        assert_eq!(broker.ready_count("routed"), 0);
        assert_eq!(broker.ready_payloads("routed_dlq"), vec![b"y".to_vec()]);
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let broker = InMemoryBroker::new();
        broker.refuse_connections(2);

        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let broker = InMemoryBroker::new();
        broker.declare("jobs", true).unwrap();
        let session = broker.connect().await.unwrap();
        let mut deliveries = session.consume("jobs", "c1").await.unwrap();

        session.cancel("c1").await.unwrap();
        assert!(deliveries.next().await.is_none());
    }
}
