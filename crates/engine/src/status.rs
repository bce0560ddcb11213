use serde::{Deserialize, Serialize};
use strato_bus::BusFanoutCounters;

use crate::module::{Category, Lifecycle};

/// Per-module view exposed through the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub name: String,
    pub domain: String,
    pub category: Category,
    pub lifecycle: Lifecycle,
    pub ready: bool,
    pub start_seconds: Option<f64>,
    pub stop_seconds: Option<f64>,
    pub uptime_seconds: Option<f64>,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
}

/// Engine-wide snapshot consumed verbatim by the external status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub modules: Vec<ModuleStatus>,
    pub slow_threshold_ms: u64,
    pub bus_fanout: BusFanoutCounters,
}
