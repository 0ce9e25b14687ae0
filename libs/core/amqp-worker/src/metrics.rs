//! Message outcome counting.
//!
//! The consumer reports every terminal outcome to an `OutcomeSink` after the
//! message was acked or rejected. `PrometheusOutcomeSink` exports the counts as
//! `rabbitmq_messages_processed_total{status, queue}`; `OutcomeCounter` keeps
//! them in memory.

use observability::MetricsRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use strum::{AsRefStr, Display, EnumIter};

/// Counter name exported for processed messages.
pub const MESSAGES_PROCESSED_TOTAL: &str = "rabbitmq_messages_processed_total";

/// Terminal outcome of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    /// Processed and acked.
    Success,
    /// Rejected without requeue.
    Failure,
}

/// Receives outcome counts from the consumer.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, outcome: Outcome, queue: &str);
}

/// In-memory outcome counts keyed by (outcome, queue).
#[derive(Debug, Clone, Default)]
pub struct OutcomeCounter {
    counts: Arc<Mutex<HashMap<(Outcome, String), u64>>>,
}

impl OutcomeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count for one outcome on one queue.
    pub fn get(&self, outcome: Outcome, queue: &str) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(outcome, queue.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Count for one outcome across all queues.
    pub fn total(&self, outcome: Outcome) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((o, _), _)| *o == outcome)
            .map(|(_, count)| count)
            .sum()
    }
}

impl OutcomeSink for OutcomeCounter {
    fn record(&self, outcome: Outcome, queue: &str) {
        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((outcome, queue.to_string()))
            .or_insert(0) += 1;
    }
}

/// Exports outcomes through a `MetricsRegistry`.
#[derive(Clone)]
pub struct PrometheusOutcomeSink {
    registry: MetricsRegistry,
}

impl PrometheusOutcomeSink {
    pub fn new(registry: MetricsRegistry) -> Self {
        registry.describe_counter(
            MESSAGES_PROCESSED_TOTAL,
            "Total RabbitMQ messages processed, by status and queue",
        );
        Self { registry }
    }
}

impl OutcomeSink for PrometheusOutcomeSink {
    fn record(&self, outcome: Outcome, queue: &str) {
        self.registry
            .counter(
                MESSAGES_PROCESSED_TOTAL,
                &[("status", outcome.to_string()), ("queue", queue.to_string())],
            )
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_outcome_labels() {
        let labels: Vec<String> = Outcome::iter().map(|o| o.to_string()).collect();
        assert_eq!(labels, vec!["success", "failure"]);
        assert_eq!(Outcome::Failure.as_ref(), "failure");
    }

    #[test]
    fn test_outcome_counter() {
        let counter = OutcomeCounter::new();
        counter.record(Outcome::Success, "a");
        counter.record(Outcome::Success, "a");
        counter.record(Outcome::Failure, "a");
        counter.record(Outcome::Success, "b");

        assert_eq!(counter.get(Outcome::Success, "a"), 2);
        assert_eq!(counter.get(Outcome::Failure, "a"), 1);
        assert_eq!(counter.get(Outcome::Failure, "b"), 0);
        assert_eq!(counter.total(Outcome::Success), 3);
    }

    #[test]
    fn test_outcome_counter_concurrent_increments() {
        let counter = OutcomeCounter::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.record(Outcome::Success, "q");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(Outcome::Success, "q"), 8000);
    }

    #[test]
    fn test_prometheus_sink_renders_counter() {
        let registry = MetricsRegistry::new().unwrap();
        let sink = PrometheusOutcomeSink::new(registry.clone());

        sink.record(Outcome::Success, "notificaciones_email_queue");
        sink.record(Outcome::Success, "notificaciones_email_queue");
        sink.record(Outcome::Failure, "notificaciones_email_queue");

        let rendered = registry.render();
        let line = |status: &str| {
            rendered
                .lines()
                .find(|l| {
                    l.starts_with(MESSAGES_PROCESSED_TOTAL)
                        && l.contains(&format!("status=\"{}\"", status))
                        && l.contains("queue=\"notificaciones_email_queue\"")
                })
                .map(str::to_string)
        };

        assert!(line("success").unwrap().ends_with(" 2"));
        assert!(line("failure").unwrap().ends_with(" 1"));
    }
}
