use async_trait::async_trait;
use strato_primitives::account::Account;
use strato_primitives::id::AccountId;
use strato_primitives::TenantId;

use crate::{Page, ProviderResult};

/// Account repository. Accounts are the only entities scoped by tenant
/// alone; everything else is scoped by `(tenant, account)`.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn insert_account(&self, account: Account) -> ProviderResult<()>;

    /// `Ok(None)` when absent; `TenantForbidden` when the id exists under
    /// another tenant.
    async fn account(&self, tenant: &TenantId, id: &AccountId) -> ProviderResult<Option<Account>>;

    async fn accounts(&self, tenant: &TenantId, page: Page) -> ProviderResult<Vec<Account>>;

    /// Metadata is the only mutable account field.
    async fn update_account(&self, account: Account) -> ProviderResult<()>;

    async fn delete_account(&self, tenant: &TenantId, id: &AccountId) -> ProviderResult<()>;
}
