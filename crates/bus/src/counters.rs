use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use strato_metrics::metrics::Counter;
use strato_metrics::Metrics;

/// Live fan-out counters. Atomics back the status surface; the `metrics`
/// facade gets the same increments for exporters.
#[derive(Debug, Default)]
pub struct FanoutCounters {
    pub(crate) events_published: AtomicU64,
    pub(crate) events_delivered: AtomicU64,
    pub(crate) data_requests: AtomicU64,
    pub(crate) data_failures: AtomicU64,
    pub(crate) compute_requests: AtomicU64,
    pub(crate) compute_failures: AtomicU64,
    pub(crate) compute_timeouts: AtomicU64,
}

#[derive(Metrics)]
#[metrics(scope = "bus")]
pub(crate) struct BusMetrics {
    /// Events published across all topics.
    pub(crate) events_published: Counter,
    /// Per-subscriber event deliveries.
    pub(crate) events_delivered: Counter,
    /// Data requests issued.
    pub(crate) data_requests: Counter,
    /// Data requests that failed.
    pub(crate) data_failures: Counter,
    /// Compute requests issued.
    pub(crate) compute_requests: Counter,
    /// Compute requests that failed.
    pub(crate) compute_failures: Counter,
    /// Compute requests that exceeded their budget.
    pub(crate) compute_timeouts: Counter,
}

/// Serializable snapshot exposed through the engine status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusFanoutCounters {
    pub events_published: u64,
    pub events_delivered: u64,
    pub data_requests: u64,
    pub data_failures: u64,
    pub compute_requests: u64,
    pub compute_failures: u64,
    pub compute_timeouts: u64,
}

impl FanoutCounters {
    pub fn snapshot(&self) -> BusFanoutCounters {
        BusFanoutCounters {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            data_requests: self.data_requests.load(Ordering::Relaxed),
            data_failures: self.data_failures.load(Ordering::Relaxed),
            compute_requests: self.compute_requests.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            compute_timeouts: self.compute_timeouts.load(Ordering::Relaxed),
        }
    }
}
