//! Event / data / compute fan-out.
//!
//! Three independent named topic spaces. Publishers hold no reference to
//! subscribers; the bus looks up subscribers by topic at publish time.
//! Events are fire-and-forget fan-out, data is single-responder
//! request/response, compute adds a time budget on top of data semantics.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::sync::Arc;
use std::time::Duration;

mod counters;
mod events;
mod request;

pub use counters::{BusFanoutCounters, FanoutCounters};
pub use events::{EventBus, EventStream};
pub use request::{ComputeBus, DataBus, Responder, ResponderError};
use serde::{Deserialize, Serialize};
use strato_primitives::Payload;

pub(crate) const LOG_TARGET: &str = "bus";

/// Tagged payload carried by every bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(tag: impl Into<String>, payload: Payload) -> Self {
        Self { tag: tag.into(), payload }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no responder registered for topic `{topic}`")]
    NoResponder { topic: String },

    #[error("a responder is already registered for topic `{topic}`")]
    ResponderExists { topic: String },

    #[error("compute on topic `{topic}` exceeded its {budget:?} budget")]
    ComputeTimeout { topic: String, budget: Duration },

    #[error("responder for topic `{topic}` failed: {message}")]
    Responder { topic: String, message: String },
}

/// The three topic spaces plus their shared fan-out counters.
#[derive(Clone)]
pub struct Bus {
    events: EventBus,
    data: DataBus,
    compute: ComputeBus,
    counters: Arc<FanoutCounters>,
}

impl Bus {
    pub fn new() -> Self {
        let counters = Arc::new(FanoutCounters::default());
        Self {
            events: EventBus::new(counters.clone()),
            data: DataBus::new(counters.clone()),
            compute: ComputeBus::new(counters.clone()),
            counters,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn data(&self) -> &DataBus {
        &self.data
    }

    pub fn compute(&self) -> &ComputeBus {
        &self.compute
    }

    /// Point-in-time counter snapshot for the status surface.
    pub fn fanout_counters(&self) -> BusFanoutCounters {
        self.counters.snapshot()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
