//! Prepaid gas bank: append-only ledger, derived balances, and the
//! withdrawal settlement loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use strato_bus::{Envelope, EventBus};
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_metrics::metrics::{Counter, Histogram};
use strato_metrics::Metrics;
use strato_primitives::gasbank::{
    Balance, GasAccount, GasTransaction, GasTxKind, GasTxStatus,
};
use strato_primitives::id::{AccountId, GasAccountId, GasTxId};
use strato_primitives::{CallerContext, Scope};
use strato_provider::traits::gasbank::GasTxTransition;
use strato_provider::{Page, StorageProvider};
use strato_tasks::TaskSpawner;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{spawn_account_cascade, topics, ServiceError};

pub(crate) const LOG_TARGET: &str = "gasbank";

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// Transient settlement failure; retried with backoff.
    #[error("retriable settlement failure: {0}")]
    Retriable(String),

    /// Permanent settlement failure; the entry fails terminally.
    #[error("settlement rejected: {0}")]
    Fatal(String),
}

/// External settlement seam (chain RPC adapter in production).
#[async_trait]
pub trait SettlementResolver: Send + Sync {
    async fn settle(&self, wallet: &str, amount: i64, reference: &str)
        -> Result<(), ResolverError>;
}

#[derive(Debug, Clone)]
pub struct GasBankConfig {
    pub poll_interval: Duration,
    pub batch: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Claim owner id; unique per process.
    pub worker_id: String,
}

impl Default for GasBankConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch: 32,
            workers: 4,
            max_attempts: 5,
            backoff_base: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(600),
            worker_id: format!("gasbank-{}", std::process::id()),
        }
    }
}

#[derive(Metrics)]
#[metrics(scope = "gasbank.settlement")]
struct SettlementMetrics {
    /// Settlement attempts.
    attempts: Counter,
    /// Withdrawals settled.
    settlements: Counter,
    /// Attempts rescheduled with backoff.
    retries: Counter,
    /// Entries that failed terminally.
    failures: Counter,
    /// Entries moved to the dead-letter queue.
    dead_letters: Counter,
    /// Resolver call latency.
    resolver_seconds: Histogram,
}

struct SettlementInner {
    storage: Arc<dyn StorageProvider>,
    resolver: Arc<dyn SettlementResolver>,
    events: EventBus,
    config: GasBankConfig,
    permits: Semaphore,
    metrics: SettlementMetrics,
}

/// Gas bank command surface plus the settlement poll loop.
pub struct GasBankService {
    base: ServiceBase,
    inner: Arc<SettlementInner>,
    spawner: TaskSpawner,
}

impl GasBankService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        resolver: Arc<dyn SettlementResolver>,
        events: EventBus,
        spawner: TaskSpawner,
        config: GasBankConfig,
    ) -> Self {
        let descriptor = ModuleDescriptor::new("gasbank", "payments", Category::Service)
            .requires("storage")
            .requires("eventBus")
            .provides("gasbank");
        let inner = Arc::new(SettlementInner {
            storage,
            resolver,
            events,
            permits: Semaphore::new(config.workers),
            config,
            metrics: SettlementMetrics::default(),
        });
        Self { base: ServiceBase::new(descriptor), inner, spawner }
    }

    /// Get-or-create keyed by wallet address; the wallet doubles as the
    /// dedup key, so retried actions converge on one account.
    pub async fn ensure_account(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        wallet: &str,
    ) -> Result<(GasAccount, Balance), ServiceError> {
        if wallet.is_empty() {
            return Err(ServiceError::Validation("wallet address is required".into()));
        }

        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        if let Some(existing) = self.inner.storage.gas_account_by_wallet(&scope, wallet).await? {
            let balance = self.inner.storage.balance(&existing.id).await?;
            return Ok((existing, balance));
        }

        let now = Utc::now();
        let account = GasAccount {
            id: GasAccountId::random(),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            wallet_address: wallet.to_owned(),
            created_at: now,
            updated_at: now,
        };
        self.inner.storage.insert_gas_account(account.clone()).await?;
        info!(target: LOG_TARGET, wallet, gas_account = %account.id, "Gas account created.");
        Ok((account, Balance::default()))
    }

    /// Records a pending deposit; it settles when the chain indexer
    /// confirms the transfer (`chain.deposit.confirmed`).
    pub async fn deposit(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        wallet: &str,
        amount: i64,
        memo: Option<String>,
    ) -> Result<GasTransaction, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Validation("deposit amount must be positive".into()));
        }
        let (account, _) = self.ensure_account(caller, account_id, wallet).await?;
        self.append(caller, &account, GasTxKind::Deposit, amount, memo, GasTxStatus::Pending)
            .await
    }

    /// Queues a withdrawal for the settlement loop after checking spendable
    /// funds (`available − pending withdrawals`).
    pub async fn withdraw(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        wallet: &str,
        amount: i64,
        memo: Option<String>,
    ) -> Result<GasTransaction, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Validation("withdrawal amount must be positive".into()));
        }

        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let account = self
            .inner
            .storage
            .gas_account_by_wallet(&scope, wallet)
            .await?
            .ok_or(ServiceError::NotFound("gas account"))?;

        let balance = self.inner.storage.balance(&account.id).await?;
        let spendable = balance.available - balance.pending_withdrawals;
        if spendable < amount {
            return Err(ServiceError::InsufficientFunds {
                available: spendable,
                requested: amount,
            });
        }

        self.append(caller, &account, GasTxKind::Withdraw, amount, memo, GasTxStatus::Pending)
            .await
    }

    /// Holds funds for a future fee; settles immediately in the ledger.
    pub async fn reserve(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        wallet: &str,
        amount: i64,
        reference: Option<String>,
    ) -> Result<GasTransaction, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Validation("reservation amount must be positive".into()));
        }

        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let account = self
            .inner
            .storage
            .gas_account_by_wallet(&scope, wallet)
            .await?
            .ok_or(ServiceError::NotFound("gas account"))?;

        let balance = self.inner.storage.balance(&account.id).await?;
        let spendable = balance.available - balance.pending_withdrawals;
        if spendable < amount {
            return Err(ServiceError::InsufficientFunds {
                available: spendable,
                requested: amount,
            });
        }

        self.append_settled(caller, &account, GasTxKind::Reserve, amount, reference).await
    }

    /// Returns a reservation to the available balance.
    pub async fn release(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        wallet: &str,
        amount: i64,
        reference: Option<String>,
    ) -> Result<GasTransaction, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let account = self
            .inner
            .storage
            .gas_account_by_wallet(&scope, wallet)
            .await?
            .ok_or(ServiceError::NotFound("gas account"))?;
        self.append_settled(caller, &account, GasTxKind::Release, amount, reference).await
    }

    /// Charges an execution fee; consumes available funds immediately.
    pub async fn charge_fee(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        wallet: &str,
        amount: i64,
        reference: Option<String>,
    ) -> Result<GasTransaction, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let account = self
            .inner
            .storage
            .gas_account_by_wallet(&scope, wallet)
            .await?
            .ok_or(ServiceError::NotFound("gas account"))?;
        self.append_settled(caller, &account, GasTxKind::Fee, amount, reference).await
    }

    pub async fn account_state(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        wallet: &str,
    ) -> Result<(GasAccount, Balance), ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let account = self
            .inner
            .storage
            .gas_account_by_wallet(&scope, wallet)
            .await?
            .ok_or(ServiceError::NotFound("gas account"))?;
        let balance = self.inner.storage.balance(&account.id).await?;
        Ok((account, balance))
    }

    pub async fn transactions(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        gas_account: Option<&GasAccountId>,
        page: Page,
    ) -> Result<Vec<GasTransaction>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.inner.storage.gas_transactions(&scope, gas_account, page).await?)
    }

    async fn append(
        &self,
        caller: &CallerContext,
        account: &GasAccount,
        kind: GasTxKind,
        amount: i64,
        reference: Option<String>,
        status: GasTxStatus,
    ) -> Result<GasTransaction, ServiceError> {
        let now = Utc::now();
        let settled = status == GasTxStatus::Settled;
        let tx = GasTransaction {
            id: GasTxId::random(),
            gas_account_id: account.id.clone(),
            account_id: account.account_id.clone(),
            tenant: caller.tenant.clone(),
            kind,
            amount,
            status,
            attempts: 0,
            reference,
            next_attempt_at: None,
            created_at: now,
            settled_at: settled.then_some(now),
        };
        self.inner.storage.insert_gas_transaction(tx.clone()).await?;
        debug!(target: LOG_TARGET, tx = %tx.id, %kind, amount, "Ledger entry appended.");
        Ok(tx)
    }

    async fn append_settled(
        &self,
        caller: &CallerContext,
        account: &GasAccount,
        kind: GasTxKind,
        amount: i64,
        reference: Option<String>,
    ) -> Result<GasTransaction, ServiceError> {
        self.append(caller, account, kind, amount, reference, GasTxStatus::Settled).await
    }
}

impl SettlementInner {
    async fn run_cycle(self: &Arc<Self>, now: DateTime<Utc>, spawner: &TaskSpawner) {
        let claimed = match self
            .storage
            .claim_due_withdrawals(now, self.config.batch, &self.config.worker_id)
            .await
        {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!(target: LOG_TARGET, %err, "Withdrawal claim pass failed.");
                return;
            }
        };

        for tx in claimed {
            let Ok(permit) = self.permits.try_acquire() else {
                // Saturated pool: release the claim; the entry stays
                // pending for the next pass.
                let transition = GasTxTransition {
                    status: GasTxStatus::Pending,
                    attempts: tx.attempts,
                    next_attempt_at: tx.next_attempt_at,
                    settled_at: None,
                };
                if let Err(err) = self.storage.transition_gas_transaction(&tx.id, transition).await
                {
                    warn!(target: LOG_TARGET, tx = %tx.id, %err, "Claim release failed.");
                }
                continue;
            };
            permit.forget();

            let inner = Arc::clone(self);
            spawner.build_task().name("gasbank-settle").spawn(async move {
                inner.settle(tx, Utc::now()).await;
                inner.permits.add_permits(1);
            });
        }
    }

    pub(crate) async fn settle(&self, tx: GasTransaction, now: DateTime<Utc>) {
        self.metrics.attempts.increment(1);
        let begun = std::time::Instant::now();

        let wallet = match self.wallet_of(&tx).await {
            Some(wallet) => wallet,
            None => {
                self.metrics.failures.increment(1);
                self.transition(&tx, GasTxStatus::Failed, tx.attempts, None, None).await;
                return;
            }
        };

        let reference = tx.reference.clone().unwrap_or_else(|| tx.id.to_string());
        let outcome = self.resolver.settle(&wallet, tx.amount, &reference).await;
        self.metrics.resolver_seconds.record(begun.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => {
                self.metrics.settlements.increment(1);
                self.transition(&tx, GasTxStatus::Settled, tx.attempts, None, Some(now)).await;
                self.events.publish(
                    topics::GAS_SETTLED,
                    Envelope::new(
                        topics::GAS_SETTLED,
                        json!({"transaction_id": tx.id, "wallet": wallet, "amount": tx.amount}),
                    ),
                );
            }
            Err(ResolverError::Fatal(reason)) => {
                self.metrics.failures.increment(1);
                warn!(target: LOG_TARGET, tx = %tx.id, reason, "Settlement rejected.");
                self.transition(&tx, GasTxStatus::Failed, tx.attempts, None, None).await;
            }
            Err(ResolverError::Retriable(reason)) => {
                let attempts = tx.attempts + 1;
                if attempts >= self.config.max_attempts {
                    self.metrics.dead_letters.increment(1);
                    warn!(
                        target: LOG_TARGET,
                        tx = %tx.id,
                        attempts,
                        "Settlement exhausted its retry budget."
                    );
                    self.transition(&tx, GasTxStatus::Dead, attempts, None, None).await;
                    self.events.publish(
                        topics::GAS_DLQ,
                        Envelope::new(
                            topics::GAS_DLQ,
                            json!({"transaction_id": tx.id, "tenant": tx.tenant}),
                        ),
                    );
                } else {
                    self.metrics.retries.increment(1);
                    let backoff = backoff(self.config.backoff_base, self.config.backoff_cap, attempts);
                    let next = now
                        + chrono::Duration::from_std(backoff)
                            .unwrap_or_else(|_| chrono::Duration::seconds(1));
                    debug!(
                        target: LOG_TARGET,
                        tx = %tx.id,
                        attempts,
                        reason,
                        ?backoff,
                        "Settlement retried."
                    );
                    self.transition(&tx, GasTxStatus::Pending, attempts, Some(next), None).await;
                }
            }
        }
    }

    async fn wallet_of(&self, tx: &GasTransaction) -> Option<String> {
        let scope = Scope::new(tx.tenant.clone(), tx.account_id.clone());
        match self.storage.gas_account(&scope, &tx.gas_account_id).await {
            Ok(Some(account)) => Some(account.wallet_address),
            Ok(None) => {
                warn!(target: LOG_TARGET, tx = %tx.id, "Gas account vanished.");
                None
            }
            Err(err) => {
                warn!(target: LOG_TARGET, tx = %tx.id, %err, "Gas account load failed.");
                None
            }
        }
    }

    async fn transition(
        &self,
        tx: &GasTransaction,
        status: GasTxStatus,
        attempts: u32,
        next_attempt_at: Option<DateTime<Utc>>,
        settled_at: Option<DateTime<Utc>>,
    ) {
        let transition = GasTxTransition { status, attempts, next_attempt_at, settled_at };
        if let Err(err) = self.storage.transition_gas_transaction(&tx.id, transition).await {
            warn!(target: LOG_TARGET, tx = %tx.id, %err, "Ledger transition failed.");
        }
    }

    /// Deposit confirmations from the chain indexer settle the matching
    /// pending deposit entry.
    async fn settle_deposit(&self, reference: &str) {
        match self.storage.pending_deposit_by_reference(reference).await {
            Ok(Some(deposit)) => {
                self.transition(&deposit, GasTxStatus::Settled, deposit.attempts, None, Some(Utc::now()))
                    .await;
                info!(target: LOG_TARGET, tx = %deposit.id, reference, "Deposit settled.");
            }
            Ok(None) => {
                debug!(target: LOG_TARGET, reference, "No pending deposit for confirmation.");
            }
            Err(err) => {
                warn!(target: LOG_TARGET, reference, %err, "Deposit lookup failed.");
            }
        }
    }
}

fn backoff(base: Duration, cap: Duration, attempts: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempts.saturating_sub(1))).min(cap)
}

#[async_trait]
impl Module for GasBankService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        let inner = self.inner.clone();
        let spawner = self.spawner.clone();
        let token = self.base.worker_token();
        let interval = inner.config.poll_interval;

        self.spawner.build_task().name("gasbank-settlement").spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => inner.run_cycle(Utc::now(), &spawner).await,
                }
            }
        });

        // Deposit confirmations arrive as chain-indexer events.
        let inner = self.inner.clone();
        let token = self.base.worker_token();
        let mut deposits = self.inner.events.subscribe(topics::CHAIN_DEPOSIT);
        self.spawner.build_task().name("gasbank-deposits").spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = deposits.recv() => {
                        let Some(envelope) = event else { break };
                        let Some(reference) =
                            envelope.payload.get("reference").and_then(|r| r.as_str())
                        else {
                            warn!(target: LOG_TARGET, "Deposit event without a reference.");
                            continue;
                        };
                        inner.settle_deposit(reference).await;
                    }
                }
            }
        });

        let storage = self.inner.storage.clone();
        spawn_account_cascade(
            &self.inner.events,
            &self.spawner,
            self.base.worker_token(),
            "gasbank-cascade",
            move |tenant, account| {
                let storage = storage.clone();
                async move {
                    if let Err(err) = storage.delete_account_gas_data(&tenant, &account).await {
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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use strato_bus::Bus;
    use strato_primitives::Role;
    use strato_provider::providers::InMemoryProvider;
    use strato_tasks::TaskManager;

    use super::*;

    struct ScriptedResolver {
        outcomes: Mutex<Vec<Result<(), ResolverError>>>,
        calls: AtomicU32,
    }

    impl ScriptedResolver {
        fn always_retriable() -> Self {
            Self { outcomes: Mutex::new(Vec::new()), calls: AtomicU32::new(0) }
        }

        fn with(outcomes: Vec<Result<(), ResolverError>>) -> Self {
            Self { outcomes: Mutex::new(outcomes), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl SettlementResolver for ScriptedResolver {
        async fn settle(
            &self,
            _wallet: &str,
            _amount: i64,
            _reference: &str,
        ) -> Result<(), ResolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Err(ResolverError::Retriable("rpc unavailable".into()))
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn caller() -> CallerContext {
        CallerContext::new("t", "tester", Role::User)
    }

    struct Fixture {
        service: GasBankService,
        bus: Bus,
        account: AccountId,
    }

    fn fixture(resolver: ScriptedResolver, config: GasBankConfig) -> Fixture {
        let bus = Bus::new();
        let service = GasBankService::new(
            Arc::new(InMemoryProvider::new()),
            Arc::new(resolver),
            bus.events().clone(),
            TaskManager::current().task_spawner(),
            config,
        );
        Fixture { service, bus, account: AccountId::new("acct") }
    }

    /// Seeds a settled deposit so the account has spendable funds.
    async fn fund(fx: &Fixture, wallet: &str, amount: i64) {
        let deposit =
            fx.service.deposit(&caller(), &fx.account, wallet, amount, None).await.unwrap();
        fx.service
            .inner
            .storage
            .transition_gas_transaction(
                &deposit.id,
                GasTxTransition {
                    status: GasTxStatus::Settled,
                    attempts: 0,
                    next_attempt_at: None,
                    settled_at: Some(Utc::now()),
                },
            )
            .await
            .unwrap();
    }

    async fn drive_settlement(fx: &Fixture, now: DateTime<Utc>) -> usize {
        let claimed =
            fx.service.inner.storage.claim_due_withdrawals(now, 16, "test").await.unwrap();
        let count = claimed.len();
        for tx in claimed {
            fx.service.inner.settle(tx, now).await;
        }
        count
    }

    #[tokio::test]
    async fn ensure_account_is_idempotent_by_wallet() {
        let fx = fixture(ScriptedResolver::always_retriable(), GasBankConfig::default());

        let (first, _) = fx.service.ensure_account(&caller(), &fx.account, "Nx").await.unwrap();
        let (second, _) = fx.service.ensure_account(&caller(), &fx.account, "Nx").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn withdrawal_settles_through_the_resolver() {
        let fx = fixture(ScriptedResolver::with(vec![Ok(())]), GasBankConfig::default());
        fund(&fx, "Nx", 1_000).await;

        let tx = fx.service.withdraw(&caller(), &fx.account, "Nx", 400, None).await.unwrap();
        assert_eq!(tx.status, GasTxStatus::Pending);

        assert_eq!(drive_settlement(&fx, Utc::now()).await, 1);

        let (_, balance) = fx.service.account_state(&caller(), &fx.account, "Nx").await.unwrap();
        assert_eq!(balance.available, 600);
        assert_eq!(balance.pending_withdrawals, 0);
    }

    #[tokio::test]
    async fn overdraw_is_rejected_against_spendable_funds() {
        let fx = fixture(ScriptedResolver::always_retriable(), GasBankConfig::default());
        fund(&fx, "Nx", 500).await;

        // First withdrawal holds 300 of the 500.
        fx.service.withdraw(&caller(), &fx.account, "Nx", 300, None).await.unwrap();

        let err =
            fx.service.withdraw(&caller(), &fx.account, "Nx", 300, None).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientFunds { available: 200, requested: 300 }
        ));
    }

    #[tokio::test]
    async fn retriable_failures_walk_into_the_dlq() {
        let config = GasBankConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            ..Default::default()
        };
        let fx = fixture(ScriptedResolver::always_retriable(), config);
        fund(&fx, "Nx", 1_000).await;

        let tx = fx.service.withdraw(&caller(), &fx.account, "Nx", 100, None).await.unwrap();
        let mut dlq_events = fx.bus.events().subscribe(topics::GAS_DLQ);

        let t0 = Utc::now();
        assert_eq!(drive_settlement(&fx, t0).await, 1);
        assert_eq!(drive_settlement(&fx, t0 + chrono::Duration::milliseconds(100)).await, 1);
        assert_eq!(drive_settlement(&fx, t0 + chrono::Duration::milliseconds(300)).await, 1);

        let stored = fx
            .service
            .transactions(&caller(), &fx.account, None, Page::default())
            .await
            .unwrap()
            .into_iter()
            .find(|entry| entry.id == tx.id)
            .unwrap();
        assert_eq!(stored.status, GasTxStatus::Dead);
        assert_eq!(stored.attempts, 3);

        // No further attempts once dead.
        assert_eq!(drive_settlement(&fx, t0 + chrono::Duration::hours(1)).await, 0);
        assert!(dlq_events.try_recv().is_some());
    }

    #[tokio::test]
    async fn fatal_failures_are_terminal_without_retry() {
        let fx = fixture(
            ScriptedResolver::with(vec![Err(ResolverError::Fatal("wallet frozen".into()))]),
            GasBankConfig::default(),
        );
        fund(&fx, "Nx", 1_000).await;

        let tx = fx.service.withdraw(&caller(), &fx.account, "Nx", 100, None).await.unwrap();
        drive_settlement(&fx, Utc::now()).await;

        let stored = fx
            .service
            .transactions(&caller(), &fx.account, None, Page::default())
            .await
            .unwrap()
            .into_iter()
            .find(|entry| entry.id == tx.id)
            .unwrap();
        assert_eq!(stored.status, GasTxStatus::Failed);
        assert_eq!(drive_settlement(&fx, Utc::now() + chrono::Duration::hours(1)).await, 0);
    }

    #[tokio::test]
    async fn indexer_event_settles_a_pending_deposit() {
        let fx = fixture(ScriptedResolver::always_retriable(), GasBankConfig::default());

        let deposit = fx
            .service
            .deposit(&caller(), &fx.account, "Nx", 750, Some("chain-tx-1".into()))
            .await
            .unwrap();
        assert_eq!(deposit.status, GasTxStatus::Pending);

        fx.service.inner.settle_deposit("chain-tx-1").await;

        let (_, balance) = fx.service.account_state(&caller(), &fx.account, "Nx").await.unwrap();
        assert_eq!(balance.available, 750);
    }

    #[tokio::test]
    async fn reservations_reduce_available_until_released() {
        let fx = fixture(ScriptedResolver::always_retriable(), GasBankConfig::default());
        fund(&fx, "Nx", 1_000).await;

        fx.service.reserve(&caller(), &fx.account, "Nx", 250, None).await.unwrap();
        let (_, held) = fx.service.account_state(&caller(), &fx.account, "Nx").await.unwrap();
        assert_eq!(held.available, 750);

        fx.service.release(&caller(), &fx.account, "Nx", 250, None).await.unwrap();
        let (_, released) =
            fx.service.account_state(&caller(), &fx.account, "Nx").await.unwrap();
        assert_eq!(released.available, 1_000);
    }
}
