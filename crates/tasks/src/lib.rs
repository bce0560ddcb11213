//! Background task management.
//!
//! Every long-running worker in the runtime is spawned through a
//! [`TaskSpawner`] so shutdown can cancel and drain them in one place.
//! Critical tasks take the whole process down with them when they end.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

pub(crate) const LOG_TARGET: &str = "tasks";

/// Owns the tracker and cancellation root for all background tasks.
#[derive(Debug)]
pub struct TaskManager {
    handle: Handle,
    tracker: TaskTracker,
    cancellation: CancellationToken,
}

impl TaskManager {
    /// Creates a manager bound to the ambient tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn new(handle: Handle) -> Self {
        Self { handle, tracker: TaskTracker::new(), cancellation: CancellationToken::new() }
    }

    pub fn task_spawner(&self) -> TaskSpawner {
        TaskSpawner {
            handle: self.handle.clone(),
            tracker: self.tracker.clone(),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Token cancelled when shutdown begins or a critical task ends.
    pub fn on_cancel(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Cancels every task and waits until all of them have drained.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Resolves once cancellation has been requested from anywhere.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// Cheap handle for spawning tracked tasks.
#[derive(Debug, Clone)]
pub struct TaskSpawner {
    handle: Handle,
    tracker: TaskTracker,
    cancellation: CancellationToken,
}

impl TaskSpawner {
    pub fn build_task(&self) -> TaskBuilder<'_> {
        TaskBuilder { spawner: self, name: None, critical: false }
    }

    /// Child token tied to the manager's cancellation root.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.child_token()
    }
}

/// Builder for a tracked task.
#[derive(Debug)]
pub struct TaskBuilder<'a> {
    spawner: &'a TaskSpawner,
    name: Option<&'static str>,
    critical: bool,
}

impl<'a> TaskBuilder<'a> {
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// A critical task cancels the whole manager when it finishes or
    /// panics.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn spawn<F>(self, fut: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let name = self.name.unwrap_or("unnamed");
        let critical = self.critical;
        let cancellation = self.spawner.cancellation.clone();

        let task = async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(output) => {
                    if critical {
                        debug!(target: LOG_TARGET, task = name, "Critical task ended.");
                        cancellation.cancel();
                    }
                    Some(output)
                }
                Err(_) => {
                    error!(target: LOG_TARGET, task = name, "Task panicked.");
                    if critical {
                        cancellation.cancel();
                    }
                    None
                }
            }
        };

        self.spawner.tracker.spawn_on(task, &self.spawner.handle)
    }
}
