//! Leaf modules wrapping the storage backend and the bus so the registry
//! can order service startup behind them.

use std::sync::Arc;

use async_trait::async_trait;
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError};
use strato_primitives::TenantId;
use strato_provider::{Page, StorageProvider};

pub(crate) struct StorageModule {
    storage: Arc<dyn StorageProvider>,
}

impl StorageModule {
    pub(crate) fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Module for StorageModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new("storage", "persistence", Category::Store).provides("storage")
    }

    async fn start(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn ready(&self) -> bool {
        // A cheap round trip doubles as the readiness probe.
        let probe = TenantId::new("readiness-probe");
        self.storage.accounts(&probe, Page { limit: 1, offset: 0 }).await.is_ok()
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}

pub(crate) struct BusModule;

#[async_trait]
impl Module for BusModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new("bus", "messaging", Category::Platform).provides("eventBus")
    }

    async fn start(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}
