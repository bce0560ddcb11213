use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::module::ModuleDescriptor;

/// Composition base for services.
///
/// Carries the descriptor, the running flag and the cancellation root for
/// the service's worker loops. Services embed one instead of inheriting
/// lifecycle behavior; their `Module` impl delegates here.
#[derive(Debug)]
pub struct ServiceBase {
    descriptor: ModuleDescriptor,
    cancellation: CancellationToken,
    running: AtomicBool,
}

impl ServiceBase {
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        Self { descriptor, cancellation: CancellationToken::new(), running: AtomicBool::new(false) }
    }

    pub fn descriptor(&self) -> ModuleDescriptor {
        self.descriptor.clone()
    }

    /// Child token for a worker loop; cancelled when the service stops.
    pub fn worker_token(&self) -> CancellationToken {
        self.cancellation.child_token()
    }

    pub fn mark_started(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Cancels every worker loop and clears the running flag.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancellation.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
