use async_trait::async_trait;
use strato_primitives::id::AccountId;
use strato_primitives::secret::Secret;
use strato_primitives::{Scope, TenantId};

use crate::{Page, ProviderResult};

/// Secret repository. Only ciphertext crosses this boundary; encryption and
/// decryption live in the vault service.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Upsert keyed by `(tenant, account, name)`. The caller bumps
    /// `version` when replacing.
    async fn put_secret(&self, secret: Secret) -> ProviderResult<()>;

    async fn secret(&self, scope: &Scope, name: &str) -> ProviderResult<Option<Secret>>;

    async fn secrets(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Secret>>;

    async fn delete_secret(&self, scope: &Scope, name: &str) -> ProviderResult<()>;

    async fn delete_account_secrets(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}
