//! The service engine: module registry, dependency-ordered lifecycle and
//! readiness.
//!
//! A *module* is a named unit with a domain, a category and declared
//! required/provided capabilities. The registry builds a DAG from the
//! capability edges (plus any explicit ones), starts modules in topological
//! order with per-module deadlines, polls readiness, and stops everything
//! in reverse order on shutdown.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod module;
mod registry;
mod service;
mod status;

pub use module::{Capability, Category, Lifecycle, Module, ModuleDescriptor, ModuleError};
pub use registry::{EngineConfig, EngineError, ModuleId, Registry, StopWarning};
pub use service::ServiceBase;
pub use status::{ModuleStatus, StatusSnapshot};

pub(crate) const LOG_TARGET: &str = "engine";
