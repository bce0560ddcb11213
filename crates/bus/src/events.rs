use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::counters::{BusMetrics, FanoutCounters};
use crate::{Envelope, LOG_TARGET};

/// Fire-and-forget topic space.
///
/// Delivery is best-effort, at-least-once per publish to each live
/// subscriber, with no backpressure on the publisher. Delivery to a given
/// subscriber is FIFO with respect to publishes observed by the bus;
/// ordering across subscribers is not guaranteed.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>>>,
    counters: Arc<FanoutCounters>,
    metrics: Arc<BusMetrics>,
}

/// Receiving half of an event subscription. Dropped streams are pruned on
/// the next publish to the topic.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl EventStream {
    /// Next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }
}

impl EventBus {
    pub(crate) fn new(counters: Arc<FanoutCounters>) -> Self {
        Self { topics: Default::default(), counters, metrics: Arc::new(BusMetrics::default()) }
    }

    pub fn subscribe(&self, topic: impl Into<String>) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.topics.write().entry(topic.into()).or_default().push(sender);
        EventStream { receiver }
    }

    /// Fans `envelope` out to every subscriber of `topic`. Returns the
    /// number of deliveries.
    pub fn publish(&self, topic: &str, envelope: Envelope) -> usize {
        self.counters.events_published.fetch_add(1, Ordering::Relaxed);
        self.metrics.events_published.increment(1);

        let mut topics = self.topics.write();
        let Some(subscribers) = topics.get_mut(topic) else {
            trace!(target: LOG_TARGET, topic, tag = %envelope.tag, "Event without subscribers.");
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber| match subscriber.send(envelope.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            // The stream was dropped; prune it.
            Err(_) => false,
        });

        self.counters.events_delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.metrics.events_delivered.increment(delivered as u64);

        trace!(target: LOG_TARGET, topic, tag = %envelope.tag, delivered, "Event published.");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(FanoutCounters::default()))
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = bus();
        let mut a = bus.subscribe("jobs");
        let mut b = bus.subscribe("jobs");

        let delivered = bus.publish("jobs", Envelope::new("job.fired", json!({"id": 1})));

        assert_eq!(delivered, 2);
        assert_eq!(a.recv().await.unwrap().tag, "job.fired");
        assert_eq!(b.recv().await.unwrap().tag, "job.fired");
    }

    #[tokio::test]
    async fn delivery_is_fifo_per_subscriber() {
        let bus = bus();
        let mut stream = bus.subscribe("jobs");

        for i in 0..10 {
            bus.publish("jobs", Envelope::new(format!("e{i}"), json!(i)));
        }

        for i in 0..10 {
            assert_eq!(stream.recv().await.unwrap().tag, format!("e{i}"));
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = bus();
        let stream = bus.subscribe("jobs");
        drop(stream);

        assert_eq!(bus.publish("jobs", Envelope::new("e", json!(null))), 0);
    }

    #[test]
    fn publish_without_subscribers_is_counted() {
        let counters = Arc::new(FanoutCounters::default());
        let bus = EventBus::new(counters.clone());

        bus.publish("nowhere", Envelope::new("e", json!(null)));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.events_published, 1);
        assert_eq!(snapshot.events_delivered, 0);
    }
}
