use async_trait::async_trait;
use strato_primitives::automation::{Job, Trigger};
use strato_primitives::id::{AccountId, JobId, TriggerId};
use strato_primitives::{Scope, TenantId};

use crate::{Page, ProviderResult};

#[async_trait]
pub trait JobProvider: Send + Sync {
    async fn insert_job(&self, job: Job) -> ProviderResult<()>;

    async fn job(&self, scope: &Scope, id: &JobId) -> ProviderResult<Option<Job>>;

    async fn job_in_tenant(&self, tenant: &TenantId, id: &JobId) -> ProviderResult<Option<Job>>;

    async fn jobs(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Job>>;

    /// All enabled jobs across tenants. Scheduler-internal; never exposed
    /// through a caller-facing command.
    async fn enabled_jobs(&self, page: Page) -> ProviderResult<Vec<Job>>;

    async fn update_job(&self, job: Job, expected_version: u64) -> ProviderResult<()>;

    async fn delete_job(&self, scope: &Scope, id: &JobId) -> ProviderResult<()>;

    async fn delete_account_jobs(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}

#[async_trait]
pub trait TriggerProvider: Send + Sync {
    async fn insert_trigger(&self, trigger: Trigger) -> ProviderResult<()>;

    async fn trigger(&self, scope: &Scope, id: &TriggerId) -> ProviderResult<Option<Trigger>>;

    async fn triggers(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Trigger>>;

    async fn update_trigger(&self, trigger: Trigger, expected_version: u64) -> ProviderResult<()>;

    async fn delete_trigger(&self, scope: &Scope, id: &TriggerId) -> ProviderResult<()>;

    async fn delete_account_triggers(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}
