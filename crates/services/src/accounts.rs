use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use strato_bus::{Envelope, EventBus};
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_primitives::account::Account;
use strato_primitives::id::AccountId;
use strato_primitives::{CallerContext, Payload};
use strato_provider::{Page, StorageProvider};
use tracing::info;

use crate::{topics, ServiceError};

pub(crate) const LOG_TARGET: &str = "accounts";

/// Root ownership service. Account removal fans out over the bus; every
/// owning service deletes its own rows.
pub struct AccountService {
    base: ServiceBase,
    storage: Arc<dyn StorageProvider>,
    events: EventBus,
}

impl AccountService {
    pub fn new(storage: Arc<dyn StorageProvider>, events: EventBus) -> Self {
        let descriptor = ModuleDescriptor::new("accounts", "identity", Category::Platform)
            .requires("storage")
            .requires("eventBus")
            .provides("accounts");
        Self { base: ServiceBase::new(descriptor), storage, events }
    }

    /// Admin command.
    pub async fn create(
        &self,
        caller: &CallerContext,
        owner: impl Into<String>,
        metadata: Payload,
    ) -> Result<Account, ServiceError> {
        if !caller.is_admin() {
            return Err(ServiceError::AdminRequired);
        }

        let account = Account::new(caller.tenant.clone(), owner, metadata);
        self.storage.insert_account(account.clone()).await?;
        info!(target: LOG_TARGET, account = %account.id, "Account created.");
        Ok(account)
    }

    pub async fn get(
        &self,
        caller: &CallerContext,
        id: &AccountId,
    ) -> Result<Account, ServiceError> {
        self.storage
            .account(&caller.tenant, id)
            .await?
            .ok_or(ServiceError::NotFound("account"))
    }

    pub async fn list(
        &self,
        caller: &CallerContext,
        page: Page,
    ) -> Result<Vec<Account>, ServiceError> {
        Ok(self.storage.accounts(&caller.tenant, page).await?)
    }

    /// Admin command. Emits `account.deleted`; owning services cascade.
    pub async fn delete(&self, caller: &CallerContext, id: &AccountId) -> Result<(), ServiceError> {
        if !caller.is_admin() {
            return Err(ServiceError::AdminRequired);
        }

        // Resolve first so deleting an absent account surfaces not_found.
        self.get(caller, id).await?;
        self.storage.delete_account(&caller.tenant, id).await?;

        self.events.publish(
            topics::ACCOUNT_DELETED,
            Envelope::new(
                topics::ACCOUNT_DELETED,
                json!({"tenant": caller.tenant, "account_id": id}),
            ),
        );
        info!(target: LOG_TARGET, account = %id, "Account deleted.");
        Ok(())
    }
}

#[async_trait]
impl Module for AccountService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
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
