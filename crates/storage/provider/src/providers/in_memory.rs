//! Map-backed storage for tests and ephemeral dev nodes.
//!
//! Every table is a `HashMap` behind one `RwLock`; claim ownership lives in
//! side maps keyed by entity id. Semantics (tenant scoping, append-only
//! enforcement, optimistic versions, claim exclusivity) match the SQL
//! provider so the two are interchangeable behind [`StorageProvider`].
//!
//! [`StorageProvider`]: crate::StorageProvider

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use strato_primitives::account::Account;
use strato_primitives::automation::{Job, Trigger};
use strato_primitives::feed::{Feed, FeedUpdate, UpdateStatus};
use strato_primitives::function::{Execution, FunctionDef};
use strato_primitives::gasbank::{Balance, GasAccount, GasTransaction, GasTxKind, GasTxStatus};
use strato_primitives::id::{
    AccountId, ExecutionId, FeedId, FunctionId, GasAccountId, GasTxId, JobId, RequestId, SecretId,
    SourceId, TriggerId, UpdateId,
};
use strato_primitives::oracle::{DataSource, OracleRequest, RequestStatus};
use strato_primitives::secret::Secret;
use strato_primitives::{Scope, TenantId};

use crate::traits::account::AccountProvider;
use crate::traits::automation::{JobProvider, TriggerProvider};
use crate::traits::feed::FeedProvider;
use crate::traits::function::{ExecutionProvider, FunctionProvider};
use crate::traits::gasbank::{GasBankProvider, GasTxTransition};
use crate::traits::oracle::OracleProvider;
use crate::traits::secret::SecretProvider;
use crate::{Page, ProviderError, ProviderResult};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    functions: HashMap<FunctionId, FunctionDef>,
    executions: HashMap<ExecutionId, Execution>,
    jobs: HashMap<JobId, Job>,
    triggers: HashMap<TriggerId, Trigger>,
    sources: HashMap<SourceId, DataSource>,
    requests: HashMap<RequestId, OracleRequest>,
    request_claims: HashMap<RequestId, String>,
    gas_accounts: HashMap<GasAccountId, GasAccount>,
    gas_txs: HashMap<GasTxId, GasTransaction>,
    gas_tx_claims: HashMap<GasTxId, String>,
    feeds: HashMap<FeedId, Feed>,
    feed_updates: HashMap<UpdateId, FeedUpdate>,
    secrets: HashMap<SecretId, Secret>,
}

#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: RwLock<Tables>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Tenant-only gate for commands that carry just an entity id.
fn tenant_scoped<'a, T>(
    row: Option<&'a T>,
    tenant: &TenantId,
    tenant_of: impl Fn(&T) -> &TenantId,
) -> ProviderResult<Option<&'a T>> {
    match row {
        None => Ok(None),
        Some(row) if tenant_of(row) != tenant => Err(ProviderError::TenantForbidden),
        Some(row) => Ok(Some(row)),
    }
}

/// Tenant gate shared by every read: absent rows read as `None`, rows under
/// a foreign tenant fail `TenantForbidden`, rows under a foreign account in
/// the same tenant read as `None`.
fn scoped<'a, T>(
    row: Option<&'a T>,
    scope: &Scope,
    tenant_of: impl Fn(&T) -> &TenantId,
    account_of: impl Fn(&T) -> &AccountId,
) -> ProviderResult<Option<&'a T>> {
    match row {
        None => Ok(None),
        Some(row) if tenant_of(row) != &scope.tenant => Err(ProviderError::TenantForbidden),
        Some(row) if account_of(row) != &scope.account => Ok(None),
        Some(row) => Ok(Some(row)),
    }
}

fn paginate<T: Clone>(mut rows: Vec<&T>, page: Page, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    rows.sort_by_key(|row| created_at(row));
    rows.into_iter().skip(page.offset).take(page.limit).cloned().collect()
}

#[async_trait]
impl AccountProvider for InMemoryProvider {
    async fn insert_account(&self, account: Account) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.accounts.contains_key(&account.id) {
            return Err(ProviderError::Backend(format!("duplicate account id {}", account.id)));
        }
        tables.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn account(&self, tenant: &TenantId, id: &AccountId) -> ProviderResult<Option<Account>> {
        let tables = self.inner.read();
        match tables.accounts.get(id) {
            None => Ok(None),
            Some(account) if &account.tenant != tenant => Err(ProviderError::TenantForbidden),
            Some(account) => Ok(Some(account.clone())),
        }
    }

    async fn accounts(&self, tenant: &TenantId, page: Page) -> ProviderResult<Vec<Account>> {
        let tables = self.inner.read();
        let rows = tables.accounts.values().filter(|a| &a.tenant == tenant).collect();
        Ok(paginate(rows, page, |a| a.created_at))
    }

    async fn update_account(&self, account: Account) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.accounts.get_mut(&account.id) {
            None => Err(ProviderError::Backend(format!("unknown account {}", account.id))),
            Some(stored) if stored.tenant != account.tenant => Err(ProviderError::TenantForbidden),
            Some(stored) => {
                stored.metadata = account.metadata;
                stored.updated_at = account.updated_at;
                Ok(())
            }
        }
    }

    async fn delete_account(&self, tenant: &TenantId, id: &AccountId) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if let Some(account) = tables.accounts.get(id) {
            if &account.tenant != tenant {
                return Err(ProviderError::TenantForbidden);
            }
            tables.accounts.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl FunctionProvider for InMemoryProvider {
    async fn insert_function(&self, function: FunctionDef) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.functions.contains_key(&function.id) {
            return Err(ProviderError::Backend(format!("duplicate function id {}", function.id)));
        }
        tables.functions.insert(function.id.clone(), function);
        Ok(())
    }

    async fn function(
        &self,
        scope: &Scope,
        id: &FunctionId,
    ) -> ProviderResult<Option<FunctionDef>> {
        let tables = self.inner.read();
        Ok(scoped(tables.functions.get(id), scope, |f| &f.tenant, |f| &f.account_id)?.cloned())
    }

    async fn function_in_tenant(
        &self,
        tenant: &TenantId,
        id: &FunctionId,
    ) -> ProviderResult<Option<FunctionDef>> {
        let tables = self.inner.read();
        Ok(tenant_scoped(tables.functions.get(id), tenant, |f| &f.tenant)?.cloned())
    }

    async fn functions(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<FunctionDef>> {
        let tables = self.inner.read();
        let rows = tables
            .functions
            .values()
            .filter(|f| f.tenant == scope.tenant && f.account_id == scope.account)
            .collect();
        Ok(paginate(rows, page, |f| f.created_at))
    }

    async fn update_function(
        &self,
        function: FunctionDef,
        expected_version: u64,
    ) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.functions.get(&function.id) {
            None => Err(ProviderError::Backend(format!("unknown function {}", function.id))),
            Some(stored) if stored.tenant != function.tenant => {
                Err(ProviderError::TenantForbidden)
            }
            Some(stored) if stored.version != expected_version => {
                Err(ProviderError::Conflict { expected: expected_version, found: stored.version })
            }
            Some(_) => {
                tables.functions.insert(function.id.clone(), function);
                Ok(())
            }
        }
    }

    async fn delete_function(&self, scope: &Scope, id: &FunctionId) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if scoped(tables.functions.get(id), scope, |f| &f.tenant, |f| &f.account_id)?.is_some() {
            tables.functions.remove(id);
        }
        Ok(())
    }

    async fn delete_account_functions(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.functions.len();
        tables.functions.retain(|_, f| !(&f.tenant == tenant && &f.account_id == account));
        Ok((before - tables.functions.len()) as u64)
    }
}

#[async_trait]
impl ExecutionProvider for InMemoryProvider {
    async fn insert_execution(&self, execution: Execution) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.executions.contains_key(&execution.id) {
            return Err(ProviderError::Immutable("execution"));
        }
        tables.executions.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn execution(
        &self,
        scope: &Scope,
        id: &ExecutionId,
    ) -> ProviderResult<Option<Execution>> {
        let tables = self.inner.read();
        Ok(scoped(tables.executions.get(id), scope, |e| &e.tenant, |e| &e.account_id)?.cloned())
    }

    async fn executions(
        &self,
        scope: &Scope,
        function: Option<&FunctionId>,
        page: Page,
    ) -> ProviderResult<Vec<Execution>> {
        let tables = self.inner.read();
        let rows = tables
            .executions
            .values()
            .filter(|e| e.tenant == scope.tenant && e.account_id == scope.account)
            .filter(|e| function.map_or(true, |f| &e.function_id == f))
            .collect();
        Ok(paginate(rows, page, |e| e.started_at))
    }

    async fn delete_account_executions(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.executions.len();
        tables.executions.retain(|_, e| !(&e.tenant == tenant && &e.account_id == account));
        Ok((before - tables.executions.len()) as u64)
    }
}

#[async_trait]
impl JobProvider for InMemoryProvider {
    async fn insert_job(&self, job: Job) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.jobs.contains_key(&job.id) {
            return Err(ProviderError::Backend(format!("duplicate job id {}", job.id)));
        }
        tables.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn job(&self, scope: &Scope, id: &JobId) -> ProviderResult<Option<Job>> {
        let tables = self.inner.read();
        Ok(scoped(tables.jobs.get(id), scope, |j| &j.tenant, |j| &j.account_id)?.cloned())
    }

    async fn job_in_tenant(&self, tenant: &TenantId, id: &JobId) -> ProviderResult<Option<Job>> {
        let tables = self.inner.read();
        Ok(tenant_scoped(tables.jobs.get(id), tenant, |j| &j.tenant)?.cloned())
    }

    async fn jobs(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Job>> {
        let tables = self.inner.read();
        let rows = tables
            .jobs
            .values()
            .filter(|j| j.tenant == scope.tenant && j.account_id == scope.account)
            .collect();
        Ok(paginate(rows, page, |j| j.created_at))
    }

    async fn enabled_jobs(&self, page: Page) -> ProviderResult<Vec<Job>> {
        let tables = self.inner.read();
        let rows = tables.jobs.values().filter(|j| j.enabled).collect();
        Ok(paginate(rows, page, |j| j.created_at))
    }

    async fn update_job(&self, job: Job, expected_version: u64) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.jobs.get(&job.id) {
            None => Err(ProviderError::Backend(format!("unknown job {}", job.id))),
            Some(stored) if stored.tenant != job.tenant => Err(ProviderError::TenantForbidden),
            Some(stored) if stored.version != expected_version => {
                Err(ProviderError::Conflict { expected: expected_version, found: stored.version })
            }
            Some(_) => {
                tables.jobs.insert(job.id.clone(), job);
                Ok(())
            }
        }
    }

    async fn delete_job(&self, scope: &Scope, id: &JobId) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if scoped(tables.jobs.get(id), scope, |j| &j.tenant, |j| &j.account_id)?.is_some() {
            tables.jobs.remove(id);
        }
        Ok(())
    }

    async fn delete_account_jobs(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.jobs.len();
        tables.jobs.retain(|_, j| !(&j.tenant == tenant && &j.account_id == account));
        Ok((before - tables.jobs.len()) as u64)
    }
}

#[async_trait]
impl TriggerProvider for InMemoryProvider {
    async fn insert_trigger(&self, trigger: Trigger) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.triggers.contains_key(&trigger.id) {
            return Err(ProviderError::Backend(format!("duplicate trigger id {}", trigger.id)));
        }
        tables.triggers.insert(trigger.id.clone(), trigger);
        Ok(())
    }

    async fn trigger(&self, scope: &Scope, id: &TriggerId) -> ProviderResult<Option<Trigger>> {
        let tables = self.inner.read();
        Ok(scoped(tables.triggers.get(id), scope, |t| &t.tenant, |t| &t.account_id)?.cloned())
    }

    async fn triggers(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Trigger>> {
        let tables = self.inner.read();
        let rows = tables
            .triggers
            .values()
            .filter(|t| t.tenant == scope.tenant && t.account_id == scope.account)
            .collect();
        Ok(paginate(rows, page, |t| t.created_at))
    }

    async fn update_trigger(&self, trigger: Trigger, expected_version: u64) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.triggers.get(&trigger.id) {
            None => Err(ProviderError::Backend(format!("unknown trigger {}", trigger.id))),
            Some(stored) if stored.tenant != trigger.tenant => {
                Err(ProviderError::TenantForbidden)
            }
            Some(stored) if stored.version != expected_version => {
                Err(ProviderError::Conflict { expected: expected_version, found: stored.version })
            }
            Some(_) => {
                tables.triggers.insert(trigger.id.clone(), trigger);
                Ok(())
            }
        }
    }

    async fn delete_trigger(&self, scope: &Scope, id: &TriggerId) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if scoped(tables.triggers.get(id), scope, |t| &t.tenant, |t| &t.account_id)?.is_some() {
            tables.triggers.remove(id);
        }
        Ok(())
    }

    async fn delete_account_triggers(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.triggers.len();
        tables.triggers.retain(|_, t| !(&t.tenant == tenant && &t.account_id == account));
        Ok((before - tables.triggers.len()) as u64)
    }
}

#[async_trait]
impl OracleProvider for InMemoryProvider {
    async fn insert_source(&self, source: DataSource) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.sources.contains_key(&source.id) {
            return Err(ProviderError::Backend(format!("duplicate source id {}", source.id)));
        }
        tables.sources.insert(source.id.clone(), source);
        Ok(())
    }

    async fn source(&self, scope: &Scope, id: &SourceId) -> ProviderResult<Option<DataSource>> {
        let tables = self.inner.read();
        Ok(scoped(tables.sources.get(id), scope, |s| &s.tenant, |s| &s.account_id)?.cloned())
    }

    async fn sources(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<DataSource>> {
        let tables = self.inner.read();
        let rows = tables
            .sources
            .values()
            .filter(|s| s.tenant == scope.tenant && s.account_id == scope.account)
            .collect();
        Ok(paginate(rows, page, |s| s.created_at))
    }

    async fn delete_source(&self, scope: &Scope, id: &SourceId) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if scoped(tables.sources.get(id), scope, |s| &s.tenant, |s| &s.account_id)?.is_some() {
            tables.sources.remove(id);
        }
        Ok(())
    }

    async fn insert_request(&self, request: OracleRequest) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.requests.contains_key(&request.id) {
            return Err(ProviderError::Backend(format!("duplicate request id {}", request.id)));
        }
        tables.requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn request(
        &self,
        scope: &Scope,
        id: &RequestId,
    ) -> ProviderResult<Option<OracleRequest>> {
        let tables = self.inner.read();
        Ok(scoped(tables.requests.get(id), scope, |r| &r.tenant, |r| &r.account_id)?.cloned())
    }

    async fn request_in_tenant(
        &self,
        tenant: &TenantId,
        id: &RequestId,
    ) -> ProviderResult<Option<OracleRequest>> {
        let tables = self.inner.read();
        Ok(tenant_scoped(tables.requests.get(id), tenant, |r| &r.tenant)?.cloned())
    }

    async fn requests(
        &self,
        scope: &Scope,
        status: Option<RequestStatus>,
        page: Page,
    ) -> ProviderResult<Vec<OracleRequest>> {
        let tables = self.inner.read();
        let rows = tables
            .requests
            .values()
            .filter(|r| r.tenant == scope.tenant && r.account_id == scope.account)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        Ok(paginate(rows, page, |r| r.created_at))
    }

    async fn claim_due_requests(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker: &str,
    ) -> ProviderResult<Vec<OracleRequest>> {
        let mut tables = self.inner.write();

        let mut due: Vec<_> = tables
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.next_attempt_at <= now)
            .filter(|r| !tables.request_claims.contains_key(&r.id))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_attempt_at);
        due.truncate(limit);

        for request in &due {
            tables.request_claims.insert(request.id.clone(), worker.to_owned());
        }
        Ok(due)
    }

    async fn update_request(&self, request: OracleRequest) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.requests.get(&request.id) {
            None => Err(ProviderError::Backend(format!("unknown request {}", request.id))),
            Some(stored) if stored.status.is_terminal() => Err(ProviderError::TerminalState {
                entity: "oracle request",
                id: request.id.to_string(),
            }),
            Some(_) => {
                tables.request_claims.remove(&request.id);
                tables.requests.insert(request.id.clone(), request);
                Ok(())
            }
        }
    }

    async fn delete_account_oracle_data(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.sources.len() + tables.requests.len();
        tables.sources.retain(|_, s| !(&s.tenant == tenant && &s.account_id == account));
        tables.requests.retain(|_, r| !(&r.tenant == tenant && &r.account_id == account));
        Ok((before - tables.sources.len() - tables.requests.len()) as u64)
    }
}

#[async_trait]
impl GasBankProvider for InMemoryProvider {
    async fn insert_gas_account(&self, account: GasAccount) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.gas_accounts.contains_key(&account.id) {
            return Err(ProviderError::Backend(format!("duplicate gas account {}", account.id)));
        }
        tables.gas_accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn gas_account(
        &self,
        scope: &Scope,
        id: &GasAccountId,
    ) -> ProviderResult<Option<GasAccount>> {
        let tables = self.inner.read();
        Ok(scoped(tables.gas_accounts.get(id), scope, |g| &g.tenant, |g| &g.account_id)?.cloned())
    }

    async fn gas_account_by_wallet(
        &self,
        scope: &Scope,
        wallet: &str,
    ) -> ProviderResult<Option<GasAccount>> {
        let tables = self.inner.read();
        let row = tables.gas_accounts.values().find(|g| g.wallet_address == wallet);
        Ok(scoped(row, scope, |g| &g.tenant, |g| &g.account_id)?.cloned())
    }

    async fn gas_accounts(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<GasAccount>> {
        let tables = self.inner.read();
        let rows = tables
            .gas_accounts
            .values()
            .filter(|g| g.tenant == scope.tenant && g.account_id == scope.account)
            .collect();
        Ok(paginate(rows, page, |g| g.created_at))
    }

    async fn insert_gas_transaction(&self, tx: GasTransaction) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.gas_txs.contains_key(&tx.id) {
            return Err(ProviderError::Immutable("gas transaction"));
        }
        tables.gas_txs.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn gas_transaction(
        &self,
        scope: &Scope,
        id: &GasTxId,
    ) -> ProviderResult<Option<GasTransaction>> {
        let tables = self.inner.read();
        Ok(scoped(tables.gas_txs.get(id), scope, |t| &t.tenant, |t| &t.account_id)?.cloned())
    }

    async fn gas_transactions(
        &self,
        scope: &Scope,
        gas_account: Option<&GasAccountId>,
        page: Page,
    ) -> ProviderResult<Vec<GasTransaction>> {
        let tables = self.inner.read();
        let rows = tables
            .gas_txs
            .values()
            .filter(|t| t.tenant == scope.tenant && t.account_id == scope.account)
            .filter(|t| gas_account.map_or(true, |g| &t.gas_account_id == g))
            .collect();
        Ok(paginate(rows, page, |t| t.created_at))
    }

    async fn pending_deposit_by_reference(
        &self,
        reference: &str,
    ) -> ProviderResult<Option<GasTransaction>> {
        let tables = self.inner.read();
        Ok(tables
            .gas_txs
            .values()
            .find(|t| {
                t.kind == GasTxKind::Deposit
                    && t.status == GasTxStatus::Pending
                    && t.reference.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn claim_due_withdrawals(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker: &str,
    ) -> ProviderResult<Vec<GasTransaction>> {
        let mut tables = self.inner.write();

        let mut due: Vec<_> = tables
            .gas_txs
            .values()
            .filter(|t| t.kind == GasTxKind::Withdraw && t.status == GasTxStatus::Pending)
            .filter(|t| t.next_attempt_at.map_or(true, |at| at <= now))
            .filter(|t| !tables.gas_tx_claims.contains_key(&t.id))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_attempt_at.unwrap_or(t.created_at));
        due.truncate(limit);

        for tx in &due {
            tables.gas_tx_claims.insert(tx.id.clone(), worker.to_owned());
        }
        Ok(due)
    }

    async fn transition_gas_transaction(
        &self,
        id: &GasTxId,
        transition: GasTxTransition,
    ) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.gas_txs.get_mut(id) {
            None => Err(ProviderError::Backend(format!("unknown gas transaction {id}"))),
            Some(stored) if stored.status != GasTxStatus::Pending => Err(
                ProviderError::TerminalState { entity: "gas transaction", id: id.to_string() },
            ),
            Some(stored) => {
                stored.status = transition.status;
                stored.attempts = transition.attempts;
                stored.next_attempt_at = transition.next_attempt_at;
                stored.settled_at = transition.settled_at;
                tables.gas_tx_claims.remove(id);
                Ok(())
            }
        }
    }

    async fn balance(&self, gas_account: &GasAccountId) -> ProviderResult<Balance> {
        let tables = self.inner.read();
        let mut balance = Balance::default();

        for tx in tables.gas_txs.values().filter(|t| &t.gas_account_id == gas_account) {
            match (tx.kind, tx.status) {
                (GasTxKind::Deposit, GasTxStatus::Settled) => balance.available += tx.amount,
                (GasTxKind::Withdraw, GasTxStatus::Settled) => balance.available -= tx.amount,
                (GasTxKind::Withdraw, GasTxStatus::Pending) => {
                    balance.pending_withdrawals += tx.amount
                }
                (GasTxKind::Fee, GasTxStatus::Settled) => balance.available -= tx.amount,
                (GasTxKind::Reserve, GasTxStatus::Settled) => balance.available -= tx.amount,
                (GasTxKind::Release, GasTxStatus::Settled) => balance.available += tx.amount,
                _ => {}
            }
        }
        Ok(balance)
    }

    async fn delete_account_gas_data(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.gas_accounts.len() + tables.gas_txs.len();
        tables.gas_accounts.retain(|_, g| !(&g.tenant == tenant && &g.account_id == account));
        tables.gas_txs.retain(|_, t| !(&t.tenant == tenant && &t.account_id == account));
        Ok((before - tables.gas_accounts.len() - tables.gas_txs.len()) as u64)
    }
}

#[async_trait]
impl FeedProvider for InMemoryProvider {
    async fn insert_feed(&self, feed: Feed) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.feeds.contains_key(&feed.id) {
            return Err(ProviderError::Backend(format!("duplicate feed id {}", feed.id)));
        }
        tables.feeds.insert(feed.id.clone(), feed);
        Ok(())
    }

    async fn feed(&self, scope: &Scope, id: &FeedId) -> ProviderResult<Option<Feed>> {
        let tables = self.inner.read();
        Ok(scoped(tables.feeds.get(id), scope, |f| &f.tenant, |f| &f.account_id)?.cloned())
    }

    async fn feed_in_tenant(
        &self,
        tenant: &TenantId,
        id: &FeedId,
    ) -> ProviderResult<Option<Feed>> {
        let tables = self.inner.read();
        Ok(tenant_scoped(tables.feeds.get(id), tenant, |f| &f.tenant)?.cloned())
    }

    async fn feeds(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Feed>> {
        let tables = self.inner.read();
        let rows = tables
            .feeds
            .values()
            .filter(|f| f.tenant == scope.tenant && f.account_id == scope.account)
            .collect();
        Ok(paginate(rows, page, |f| f.created_at))
    }

    async fn enabled_feeds(&self, page: Page) -> ProviderResult<Vec<Feed>> {
        let tables = self.inner.read();
        let rows = tables.feeds.values().filter(|f| f.enabled).collect();
        Ok(paginate(rows, page, |f| f.created_at))
    }

    async fn update_feed(&self, feed: Feed, expected_version: u64) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.feeds.get(&feed.id) {
            None => Err(ProviderError::Backend(format!("unknown feed {}", feed.id))),
            Some(stored) if stored.tenant != feed.tenant => Err(ProviderError::TenantForbidden),
            Some(stored) if stored.version != expected_version => {
                Err(ProviderError::Conflict { expected: expected_version, found: stored.version })
            }
            Some(_) => {
                tables.feeds.insert(feed.id.clone(), feed);
                Ok(())
            }
        }
    }

    async fn publish_round(
        &self,
        feed: Feed,
        expected_version: u64,
        update: FeedUpdate,
    ) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.feeds.get(&feed.id) {
            None => return Err(ProviderError::Backend(format!("unknown feed {}", feed.id))),
            Some(stored) if stored.version != expected_version => {
                return Err(ProviderError::Conflict {
                    expected: expected_version,
                    found: stored.version,
                })
            }
            Some(_) => {}
        }
        if tables.feed_updates.contains_key(&update.id) {
            return Err(ProviderError::Immutable("feed update"));
        }
        tables.feeds.insert(feed.id.clone(), feed);
        tables.feed_updates.insert(update.id.clone(), update);
        Ok(())
    }

    async fn delete_feed(&self, scope: &Scope, id: &FeedId) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if scoped(tables.feeds.get(id), scope, |f| &f.tenant, |f| &f.account_id)?.is_some() {
            tables.feeds.remove(id);
            tables.feed_updates.retain(|_, u| &u.feed_id != id);
        }
        Ok(())
    }

    async fn insert_feed_update(&self, update: FeedUpdate) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        if tables.feed_updates.contains_key(&update.id) {
            return Err(ProviderError::Immutable("feed update"));
        }
        tables.feed_updates.insert(update.id.clone(), update);
        Ok(())
    }

    async fn feed_updates(
        &self,
        scope: &Scope,
        feed: &FeedId,
        round: Option<u64>,
        page: Page,
    ) -> ProviderResult<Vec<FeedUpdate>> {
        let tables = self.inner.read();
        let rows = tables
            .feed_updates
            .values()
            .filter(|u| u.tenant == scope.tenant && u.account_id == scope.account)
            .filter(|u| &u.feed_id == feed)
            .filter(|u| round.map_or(true, |r| u.round_id == r))
            .collect();
        Ok(paginate(rows, page, |u| u.created_at))
    }

    async fn transition_feed_update(
        &self,
        id: &UpdateId,
        status: UpdateStatus,
        error: Option<String>,
    ) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        match tables.feed_updates.get_mut(id) {
            None => Err(ProviderError::Backend(format!("unknown feed update {id}"))),
            Some(stored) if stored.status != UpdateStatus::Pending => {
                Err(ProviderError::TerminalState { entity: "feed update", id: id.to_string() })
            }
            Some(stored) => {
                stored.status = status;
                stored.error = error;
                Ok(())
            }
        }
    }

    async fn prune_feed_updates(&self, feed: &FeedId, keep: usize) -> ProviderResult<u64> {
        let mut tables = self.inner.write();

        let mut updates: Vec<_> = tables
            .feed_updates
            .values()
            .filter(|u| &u.feed_id == feed)
            .map(|u| (u.created_at, u.id.clone()))
            .collect();
        updates.sort_by(|a, b| b.0.cmp(&a.0));

        let stale: Vec<_> = updates.into_iter().skip(keep).map(|(_, id)| id).collect();
        for id in &stale {
            tables.feed_updates.remove(id);
        }
        Ok(stale.len() as u64)
    }

    async fn delete_account_feeds(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.feeds.len() + tables.feed_updates.len();
        tables.feeds.retain(|_, f| !(&f.tenant == tenant && &f.account_id == account));
        tables.feed_updates.retain(|_, u| !(&u.tenant == tenant && &u.account_id == account));
        Ok((before - tables.feeds.len() - tables.feed_updates.len()) as u64)
    }
}

#[async_trait]
impl SecretProvider for InMemoryProvider {
    async fn put_secret(&self, secret: Secret) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        // Upsert by (tenant, account, name).
        let existing = tables
            .secrets
            .values()
            .find(|s| {
                s.tenant == secret.tenant
                    && s.account_id == secret.account_id
                    && s.name == secret.name
            })
            .map(|s| s.id.clone());
        if let Some(id) = existing {
            tables.secrets.remove(&id);
        }
        tables.secrets.insert(secret.id.clone(), secret);
        Ok(())
    }

    async fn secret(&self, scope: &Scope, name: &str) -> ProviderResult<Option<Secret>> {
        let tables = self.inner.read();
        let row = tables
            .secrets
            .values()
            .find(|s| s.tenant == scope.tenant && s.account_id == scope.account && s.name == name);
        Ok(row.cloned())
    }

    async fn secrets(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Secret>> {
        let tables = self.inner.read();
        let rows = tables
            .secrets
            .values()
            .filter(|s| s.tenant == scope.tenant && s.account_id == scope.account)
            .collect();
        Ok(paginate(rows, page, |s| s.created_at))
    }

    async fn delete_secret(&self, scope: &Scope, name: &str) -> ProviderResult<()> {
        let mut tables = self.inner.write();
        tables.secrets.retain(|_, s| {
            !(s.tenant == scope.tenant && s.account_id == scope.account && s.name == name)
        });
        Ok(())
    }

    async fn delete_account_secrets(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let mut tables = self.inner.write();
        let before = tables.secrets.len();
        tables.secrets.retain(|_, s| !(&s.tenant == tenant && &s.account_id == account));
        Ok((before - tables.secrets.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use strato_primitives::function::{Execution, ExecutionStatus};
    use strato_primitives::gasbank::GasTxKind;

    use super::*;

    fn scope(tenant: &str, account: &str) -> Scope {
        Scope::new(TenantId::new(tenant), AccountId::new(account))
    }

    fn function(tenant: &str, account: &str) -> FunctionDef {
        let now = Utc::now();
        FunctionDef {
            id: FunctionId::random(),
            account_id: AccountId::new(account),
            tenant: TenantId::new(tenant),
            name: "fn".into(),
            source: "handler".into(),
            secrets: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn request(tenant: &str, account: &str, due_in_ms: i64) -> OracleRequest {
        let now = Utc::now();
        OracleRequest {
            id: RequestId::random(),
            account_id: AccountId::new(account),
            tenant: TenantId::new(tenant),
            source_id: SourceId::new("src"),
            payload: json!({}),
            status: RequestStatus::Pending,
            attempts: 0,
            next_attempt_at: now + Duration::milliseconds(due_in_ms),
            ttl_expires_at: now + Duration::hours(1),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn cross_tenant_read_is_forbidden() {
        let store = InMemoryProvider::new();
        let f = function("tenant-a", "acct-1");
        let id = f.id.clone();
        store.insert_function(f).await.unwrap();

        let err = store.function(&scope("tenant-b", "acct-1"), &id).await.unwrap_err();
        assert!(matches!(err, ProviderError::TenantForbidden));

        // Same tenant, different account: invisible rather than forbidden.
        let hidden = store.function(&scope("tenant-a", "acct-2"), &id).await.unwrap();
        assert!(hidden.is_none());
    }

    #[tokio::test]
    async fn version_conflicts_are_detected() {
        let store = InMemoryProvider::new();
        let mut f = function("t", "a");
        store.insert_function(f.clone()).await.unwrap();

        f.version = 2;
        store.update_function(f.clone(), 1).await.unwrap();

        // Stale writer still expects version 1.
        let err = store.update_function(f.clone(), 1).await.unwrap_err();
        assert!(matches!(err, ProviderError::Conflict { expected: 1, found: 2 }));
    }

    #[tokio::test]
    async fn executions_are_append_only() {
        let store = InMemoryProvider::new();
        let now = Utc::now();
        let execution = Execution {
            id: ExecutionId::random(),
            function_id: FunctionId::new("f"),
            account_id: AccountId::new("a"),
            tenant: TenantId::new("t"),
            input: json!({}),
            output: None,
            status: ExecutionStatus::Succeeded,
            error: None,
            actions: vec![],
            started_at: now,
            completed_at: now,
        };

        store.insert_execution(execution.clone()).await.unwrap();
        let err = store.insert_execution(execution).await.unwrap_err();
        assert!(matches!(err, ProviderError::Immutable("execution")));
    }

    #[tokio::test]
    async fn claims_are_exclusive_until_released() {
        let store = InMemoryProvider::new();
        let r = request("t", "a", -10);
        let id = r.id.clone();
        store.insert_request(r).await.unwrap();

        let now = Utc::now();
        let first = store.claim_due_requests(now, 10, "worker-1").await.unwrap();
        assert_eq!(first.len(), 1);

        // Second worker sees nothing while the claim is held.
        let second = store.claim_due_requests(now, 10, "worker-2").await.unwrap();
        assert!(second.is_empty());

        let mut updated = first.into_iter().next().unwrap();
        updated.attempts = 1;
        updated.next_attempt_at = now + Duration::milliseconds(100);
        store.update_request(updated).await.unwrap();

        let after = store
            .claim_due_requests(now + Duration::milliseconds(200), 10, "worker-2")
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, id);
    }

    #[tokio::test]
    async fn terminal_requests_reject_further_updates() {
        let store = InMemoryProvider::new();
        let r = request("t", "a", -10);
        store.insert_request(r.clone()).await.unwrap();

        let mut done = r.clone();
        done.status = RequestStatus::Succeeded;
        store.update_request(done.clone()).await.unwrap();

        let err = store.update_request(done).await.unwrap_err();
        assert!(matches!(err, ProviderError::TerminalState { .. }));
    }

    #[tokio::test]
    async fn balance_is_derived_from_the_ledger() {
        let store = InMemoryProvider::new();
        let gas_account = GasAccountId::new("ga");
        let now = Utc::now();

        let entry = |kind, amount, status| GasTransaction {
            id: GasTxId::random(),
            gas_account_id: gas_account.clone(),
            account_id: AccountId::new("a"),
            tenant: TenantId::new("t"),
            kind,
            amount,
            status,
            attempts: 0,
            reference: None,
            next_attempt_at: None,
            created_at: now,
            settled_at: None,
        };

        store
            .insert_gas_transaction(entry(GasTxKind::Deposit, 1_000, GasTxStatus::Settled))
            .await
            .unwrap();
        store
            .insert_gas_transaction(entry(GasTxKind::Withdraw, 300, GasTxStatus::Settled))
            .await
            .unwrap();
        store
            .insert_gas_transaction(entry(GasTxKind::Withdraw, 150, GasTxStatus::Pending))
            .await
            .unwrap();
        store
            .insert_gas_transaction(entry(GasTxKind::Reserve, 100, GasTxStatus::Settled))
            .await
            .unwrap();
        store
            .insert_gas_transaction(entry(GasTxKind::Release, 40, GasTxStatus::Settled))
            .await
            .unwrap();

        let balance = store.balance(&gas_account).await.unwrap();
        assert_eq!(balance.available, 1_000 - 300 - 100 + 40);
        assert_eq!(balance.pending_withdrawals, 150);
    }

    #[tokio::test]
    async fn secret_upsert_replaces_by_name() {
        let store = InMemoryProvider::new();
        let now = Utc::now();
        let secret = |version: u64| Secret {
            id: SecretId::random(),
            account_id: AccountId::new("a"),
            tenant: TenantId::new("t"),
            name: "api-key".into(),
            ciphertext: vec![version as u8],
            version,
            created_at: now,
            updated_at: now,
        };

        store.put_secret(secret(1)).await.unwrap();
        store.put_secret(secret(2)).await.unwrap();

        let stored = store.secret(&scope("t", "a"), "api-key").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(store.secrets(&scope("t", "a"), Page::default()).await.unwrap().len(), 1);
    }
}
