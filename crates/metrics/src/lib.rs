//! Facade over the `metrics` ecosystem.
//!
//! Dispatchers declare scoped metric structs with the [`Metrics`] derive and
//! record through the re-exported handles. Installing a recorder/exporter is
//! the embedding process' concern; without one, every record is a no-op.
//!
//! ```ignore
//! use strato_metrics::metrics::Counter;
//! use strato_metrics::Metrics;
//!
//! #[derive(Metrics)]
//! #[metrics(scope = "oracle.dispatcher")]
//! struct DispatcherMetrics {
//!     /// Total fetch attempts.
//!     attempts: Counter,
//! }
//! ```

pub use metrics_derive::Metrics;

pub mod metrics {
    pub use ::metrics::*;
}
