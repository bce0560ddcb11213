//! Function execution.
//!
//! The executor owns the seven-step pipeline: scoped load, secret
//! resolution, input freezing, sandboxed run under a wall-clock timeout,
//! output freezing, strictly-serial action dispatch, and unconditional
//! persistence of the resulting execution record.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod actions;
mod executor;
mod resolver;
mod sandbox;

pub use actions::{ActionContext, ActionError, ActionHandler, ActionRegistry};
pub use executor::{ExecuteError, ExecutorConfig, FunctionExecutor};
pub use resolver::{ResolveError, SecretResolver};
pub use sandbox::{ActionRequest, FunctionSandbox, NoopSandbox, SandboxError, SandboxOutput};
use strato_provider::traits::function::{ExecutionProvider, FunctionProvider};

pub(crate) const LOG_TARGET: &str = "executor";

/// The slice of storage the executor touches: function reads plus the
/// append-only execution log.
pub trait ExecutorStorage: FunctionProvider + ExecutionProvider + Send + Sync {}

impl<T> ExecutorStorage for T where T: FunctionProvider + ExecutionProvider + Send + Sync {}
