use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use strato_bus::EventBus;
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_primitives::automation::Trigger;
use strato_primitives::id::{AccountId, TriggerId};
use strato_primitives::{CallerContext, Payload, Scope};
use strato_provider::{Page, StorageProvider};
use strato_tasks::TaskSpawner;
use tracing::{info, warn};

use crate::{spawn_account_cascade, ServiceError};

pub(crate) const LOG_TARGET: &str = "triggers";

/// Cross-service fan-out rules. Triggers are registered and toggled here;
/// firing them is the consuming services' business.
pub struct TriggerService {
    base: ServiceBase,
    storage: Arc<dyn StorageProvider>,
    events: EventBus,
    spawner: TaskSpawner,
}

impl TriggerService {
    pub fn new(storage: Arc<dyn StorageProvider>, events: EventBus, spawner: TaskSpawner) -> Self {
        let descriptor = ModuleDescriptor::new("triggers", "automation", Category::Service)
            .requires("storage")
            .requires("eventBus")
            .provides("triggers");
        Self { base: ServiceBase::new(descriptor), storage, events, spawner }
    }

    pub async fn register(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        kind: &str,
        rule: &str,
        config: Payload,
    ) -> Result<Trigger, ServiceError> {
        if kind.is_empty() || rule.is_empty() {
            return Err(ServiceError::Validation("trigger kind and rule are required".into()));
        }

        let now = Utc::now();
        let trigger = Trigger {
            id: TriggerId::random(),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            kind: kind.to_owned(),
            rule: rule.to_owned(),
            config,
            enabled: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_trigger(trigger.clone()).await?;
        info!(target: LOG_TARGET, trigger = %trigger.id, kind, "Trigger registered.");
        Ok(trigger)
    }

    pub async fn get(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &TriggerId,
    ) -> Result<Trigger, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.storage.trigger(&scope, id).await?.ok_or(ServiceError::NotFound("trigger"))
    }

    pub async fn list(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        page: Page,
    ) -> Result<Vec<Trigger>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.storage.triggers(&scope, page).await?)
    }

    pub async fn set_enabled(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &TriggerId,
        enabled: bool,
    ) -> Result<Trigger, ServiceError> {
        let mut trigger = self.get(caller, account_id, id).await?;
        let expected = trigger.version;
        trigger.enabled = enabled;
        trigger.version += 1;
        trigger.updated_at = Utc::now();

        self.storage.update_trigger(trigger.clone(), expected).await?;
        Ok(trigger)
    }

    pub async fn delete(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &TriggerId,
    ) -> Result<(), ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.storage.delete_trigger(&scope, id).await?;
        Ok(())
    }
}

#[async_trait]
impl Module for TriggerService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        let storage = self.storage.clone();
        spawn_account_cascade(
            &self.events,
            &self.spawner,
            self.base.worker_token(),
            "triggers-cascade",
            move |tenant, account| {
                let storage = storage.clone();
                async move {
                    if let Err(err) = storage.delete_account_triggers(&tenant, &account).await {
                        warn!(target: LOG_TARGET, %err, "Cascade delete failed.");
                    }
                }
            },
        );
        self.base.mark_started();
        Ok(())
    }

    async fn ready(&self) -> bool {
        self.base.is_running()
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        self.base.mark_stopped();
        Ok(())
    }
}
