use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strato_primitives::gasbank::{Balance, GasAccount, GasTransaction, GasTxStatus};
use strato_primitives::id::{AccountId, GasAccountId, GasTxId};
use strato_primitives::{Scope, TenantId};

use crate::{Page, ProviderResult};

/// Settlement-related fields that may change on a ledger entry. Everything
/// else (kind, amount, account) is immutable after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct GasTxTransition {
    pub status: GasTxStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait GasBankProvider: Send + Sync {
    async fn insert_gas_account(&self, account: GasAccount) -> ProviderResult<()>;

    async fn gas_account(
        &self,
        scope: &Scope,
        id: &GasAccountId,
    ) -> ProviderResult<Option<GasAccount>>;

    async fn gas_account_by_wallet(
        &self,
        scope: &Scope,
        wallet: &str,
    ) -> ProviderResult<Option<GasAccount>>;

    async fn gas_accounts(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<GasAccount>>;

    /// Ledger entries are append-only; inserting an existing id fails.
    async fn insert_gas_transaction(&self, tx: GasTransaction) -> ProviderResult<()>;

    async fn gas_transaction(
        &self,
        scope: &Scope,
        id: &GasTxId,
    ) -> ProviderResult<Option<GasTransaction>>;

    async fn gas_transactions(
        &self,
        scope: &Scope,
        gas_account: Option<&GasAccountId>,
        page: Page,
    ) -> ProviderResult<Vec<GasTransaction>>;

    /// Matches a chain-indexer deposit notification to its pending ledger
    /// entry. Unscoped: the indexer does not know tenants.
    async fn pending_deposit_by_reference(
        &self,
        reference: &str,
    ) -> ProviderResult<Option<GasTransaction>>;

    /// Atomically claims up to `limit` pending withdrawals due for
    /// settlement.
    async fn claim_due_withdrawals(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker: &str,
    ) -> ProviderResult<Vec<GasTransaction>>;

    /// Applies a settlement transition and releases any claim. Only the
    /// transition fields change; `TerminalState` once settled/failed/dead.
    async fn transition_gas_transaction(
        &self,
        id: &GasTxId,
        transition: GasTxTransition,
    ) -> ProviderResult<()>;

    /// Derived balance: `Σ settled deposits − Σ settled withdrawals − Σ
    /// settled fees − Σ active reservations (reserve − release)`.
    /// `pending_withdrawals` sums unsettled withdraw entries.
    async fn balance(&self, gas_account: &GasAccountId) -> ProviderResult<Balance>;

    async fn delete_account_gas_data(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}
