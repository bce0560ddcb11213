use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use strato_primitives::Payload;

use crate::counters::{BusMetrics, FanoutCounters};
use crate::BusError;

pub type ResponderError = Box<dyn std::error::Error + Send + Sync>;

/// Single responder behind a data or compute topic.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: Payload) -> Result<Payload, ResponderError>;
}

/// Request/response topic space with exactly one responder per topic.
#[derive(Clone)]
pub struct DataBus {
    responders: Arc<RwLock<HashMap<String, Arc<dyn Responder>>>>,
    counters: Arc<FanoutCounters>,
    metrics: Arc<BusMetrics>,
}

impl DataBus {
    pub(crate) fn new(counters: Arc<FanoutCounters>) -> Self {
        Self { responders: Default::default(), counters, metrics: Arc::new(BusMetrics::default()) }
    }

    pub fn register(
        &self,
        topic: impl Into<String>,
        responder: Arc<dyn Responder>,
    ) -> Result<(), BusError> {
        let topic = topic.into();
        let mut responders = self.responders.write();
        if responders.contains_key(&topic) {
            return Err(BusError::ResponderExists { topic });
        }
        responders.insert(topic, responder);
        Ok(())
    }

    pub async fn request(&self, topic: &str, request: Payload) -> Result<Payload, BusError> {
        self.counters.data_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.data_requests.increment(1);

        let responder = self.responders.read().get(topic).cloned();
        let Some(responder) = responder else {
            self.counters.data_failures.fetch_add(1, Ordering::Relaxed);
            self.metrics.data_failures.increment(1);
            return Err(BusError::NoResponder { topic: topic.to_owned() });
        };

        responder.respond(request).await.map_err(|err| {
            self.counters.data_failures.fetch_add(1, Ordering::Relaxed);
            self.metrics.data_failures.increment(1);
            BusError::Responder { topic: topic.to_owned(), message: err.to_string() }
        })
    }
}

/// Request/response with a per-topic time budget.
#[derive(Clone)]
pub struct ComputeBus {
    responders: Arc<RwLock<HashMap<String, (Duration, Arc<dyn Responder>)>>>,
    counters: Arc<FanoutCounters>,
    metrics: Arc<BusMetrics>,
}

impl ComputeBus {
    pub(crate) fn new(counters: Arc<FanoutCounters>) -> Self {
        Self { responders: Default::default(), counters, metrics: Arc::new(BusMetrics::default()) }
    }

    pub fn register(
        &self,
        topic: impl Into<String>,
        budget: Duration,
        responder: Arc<dyn Responder>,
    ) -> Result<(), BusError> {
        let topic = topic.into();
        let mut responders = self.responders.write();
        if responders.contains_key(&topic) {
            return Err(BusError::ResponderExists { topic });
        }
        responders.insert(topic, (budget, responder));
        Ok(())
    }

    pub async fn request(&self, topic: &str, request: Payload) -> Result<Payload, BusError> {
        self.counters.compute_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.compute_requests.increment(1);

        let responder = self.responders.read().get(topic).cloned();
        let Some((budget, responder)) = responder else {
            self.counters.compute_failures.fetch_add(1, Ordering::Relaxed);
            self.metrics.compute_failures.increment(1);
            return Err(BusError::NoResponder { topic: topic.to_owned() });
        };

        match tokio::time::timeout(budget, responder.respond(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                self.counters.compute_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.compute_failures.increment(1);
                Err(BusError::Responder { topic: topic.to_owned(), message: err.to_string() })
            }
            Err(_) => {
                self.counters.compute_timeouts.fetch_add(1, Ordering::Relaxed);
                self.metrics.compute_timeouts.increment(1);
                Err(BusError::ComputeTimeout { topic: topic.to_owned(), budget })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Echo;

    #[async_trait]
    impl Responder for Echo {
        async fn respond(&self, request: Payload) -> Result<Payload, ResponderError> {
            Ok(request)
        }
    }

    struct Stuck;

    #[async_trait]
    impl Responder for Stuck {
        async fn respond(&self, _request: Payload) -> Result<Payload, ResponderError> {
            futures_never().await
        }
    }

    async fn futures_never() -> Result<Payload, ResponderError> {
        std::future::pending().await
    }

    #[tokio::test]
    async fn data_round_trip() {
        let bus = DataBus::new(Arc::new(FanoutCounters::default()));
        bus.register("quotes", Arc::new(Echo)).unwrap();

        let response = bus.request("quotes", json!({"pair": "NEO/USD"})).await.unwrap();
        assert_eq!(response, json!({"pair": "NEO/USD"}));
    }

    #[tokio::test]
    async fn missing_responder_fails() {
        let bus = DataBus::new(Arc::new(FanoutCounters::default()));
        let err = bus.request("quotes", json!(null)).await.unwrap_err();
        assert!(matches!(err, BusError::NoResponder { .. }));
    }

    #[tokio::test]
    async fn second_responder_is_rejected() {
        let bus = DataBus::new(Arc::new(FanoutCounters::default()));
        bus.register("quotes", Arc::new(Echo)).unwrap();
        assert!(matches!(
            bus.register("quotes", Arc::new(Echo)),
            Err(BusError::ResponderExists { .. })
        ));
    }

    #[tokio::test]
    async fn compute_budget_is_enforced() {
        let bus = ComputeBus::new(Arc::new(FanoutCounters::default()));
        bus.register("slow", Duration::from_millis(10), Arc::new(Stuck)).unwrap();

        let err = bus.request("slow", json!(null)).await.unwrap_err();
        assert!(matches!(err, BusError::ComputeTimeout { .. }));
    }
}
