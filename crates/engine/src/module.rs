use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type ModuleError = Box<dyn std::error::Error + Send + Sync>;

/// Capability names are the auto-wiring currency: an edge is added from
/// every module requiring a capability to each module providing it.
pub type Capability = &'static str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Store,
    Platform,
    App,
    Service,
    Runner,
}

/// Where a module sits in its lifecycle. `Failed` is terminal for the
/// current process; readiness may flap between `Ready` and `NotReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Registered,
    Starting,
    Started,
    Ready,
    NotReady,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub name: &'static str,
    pub domain: &'static str,
    pub category: Category,
    pub requires: Vec<Capability>,
    pub provides: Vec<Capability>,
}

impl ModuleDescriptor {
    pub fn new(name: &'static str, domain: &'static str, category: Category) -> Self {
        Self { name, domain, category, requires: Vec::new(), provides: Vec::new() }
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.requires.push(capability);
        self
    }

    pub fn provides(mut self, capability: Capability) -> Self {
        self.provides.push(capability);
        self
    }
}

/// A unit managed by the registry.
#[async_trait]
pub trait Module: Send + Sync {
    fn descriptor(&self) -> ModuleDescriptor;

    async fn start(&self) -> Result<(), ModuleError>;

    /// Readiness is polled after start and again on every status snapshot.
    async fn ready(&self) -> bool {
        true
    }

    async fn stop(&self) -> Result<(), ModuleError>;
}
