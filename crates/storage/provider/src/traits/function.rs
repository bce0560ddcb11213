use async_trait::async_trait;
use strato_primitives::function::{Execution, FunctionDef};
use strato_primitives::id::{AccountId, ExecutionId, FunctionId};
use strato_primitives::{Scope, TenantId};

use crate::{Page, ProviderResult};

#[async_trait]
pub trait FunctionProvider: Send + Sync {
    async fn insert_function(&self, function: FunctionDef) -> ProviderResult<()>;

    async fn function(&self, scope: &Scope, id: &FunctionId)
        -> ProviderResult<Option<FunctionDef>>;

    /// Lookup for commands that carry only a function id; the owning
    /// account comes from the stored row.
    async fn function_in_tenant(
        &self,
        tenant: &TenantId,
        id: &FunctionId,
    ) -> ProviderResult<Option<FunctionDef>>;

    async fn functions(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<FunctionDef>>;

    /// Optimistic update: fails with `Conflict` unless the stored version
    /// equals `expected_version`. The caller supplies the bumped entity.
    async fn update_function(
        &self,
        function: FunctionDef,
        expected_version: u64,
    ) -> ProviderResult<()>;

    async fn delete_function(&self, scope: &Scope, id: &FunctionId) -> ProviderResult<()>;

    /// Account-deletion cascade. Returns the number of removed functions.
    async fn delete_account_functions(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}

/// Executions are append-only: there is no update operation, and inserting
/// an existing id fails.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    async fn insert_execution(&self, execution: Execution) -> ProviderResult<()>;

    async fn execution(&self, scope: &Scope, id: &ExecutionId) -> ProviderResult<Option<Execution>>;

    async fn executions(
        &self,
        scope: &Scope,
        function: Option<&FunctionId>,
        page: Page,
    ) -> ProviderResult<Vec<Execution>>;

    /// Account-deletion cascade; removal is lifecycle, not mutation.
    async fn delete_account_executions(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}
