use chrono::{DateTime, Utc};

use async_trait::async_trait;
use strato_primitives::id::{AccountId, RequestId, SourceId};
use strato_primitives::oracle::{DataSource, OracleRequest, RequestStatus};
use strato_primitives::{Scope, TenantId};

use crate::{Page, ProviderResult};

#[async_trait]
pub trait OracleProvider: Send + Sync {
    async fn insert_source(&self, source: DataSource) -> ProviderResult<()>;

    async fn source(&self, scope: &Scope, id: &SourceId) -> ProviderResult<Option<DataSource>>;

    async fn sources(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<DataSource>>;

    async fn delete_source(&self, scope: &Scope, id: &SourceId) -> ProviderResult<()>;

    async fn insert_request(&self, request: OracleRequest) -> ProviderResult<()>;

    async fn request(&self, scope: &Scope, id: &RequestId)
        -> ProviderResult<Option<OracleRequest>>;

    async fn request_in_tenant(
        &self,
        tenant: &TenantId,
        id: &RequestId,
    ) -> ProviderResult<Option<OracleRequest>>;

    async fn requests(
        &self,
        scope: &Scope,
        status: Option<RequestStatus>,
        page: Page,
    ) -> ProviderResult<Vec<OracleRequest>>;

    /// Atomically claims up to `limit` pending requests whose
    /// `next_attempt_at` has passed. A claimed request is owned by exactly
    /// one worker until [`update_request`](Self::update_request) releases
    /// it.
    async fn claim_due_requests(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker: &str,
    ) -> ProviderResult<Vec<OracleRequest>>;

    /// Persists a dispatch outcome and releases the claim. Rejects with
    /// `TerminalState` once the stored request has left `pending`.
    async fn update_request(&self, request: OracleRequest) -> ProviderResult<()>;

    async fn delete_account_oracle_data(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}
