//! Behavioral parity checks between the SQL backend and the provider
//! contract: scoping, optimistic versions, append-only fencing and claim
//! exclusivity.

use chrono::{Duration, Utc};
use serde_json::json;
use strato_db::SqlStorage;
use strato_primitives::function::{Execution, ExecutionStatus, FunctionDef};
use strato_primitives::gasbank::{GasTransaction, GasTxKind, GasTxStatus};
use strato_primitives::id::{AccountId, ExecutionId, FunctionId, GasAccountId, GasTxId, RequestId, SourceId};
use strato_primitives::oracle::{OracleRequest, RequestStatus};
use strato_primitives::{Scope, TenantId};
use strato_provider::traits::function::{ExecutionProvider, FunctionProvider};
use strato_provider::traits::gasbank::GasBankProvider;
use strato_provider::traits::oracle::OracleProvider;
use strato_provider::{Page, ProviderError};

fn scope(tenant: &str, account: &str) -> Scope {
    Scope::new(TenantId::new(tenant), AccountId::new(account))
}

fn function(tenant: &str, account: &str) -> FunctionDef {
    let now = Utc::now();
    FunctionDef {
        id: FunctionId::random(),
        account_id: AccountId::new(account),
        tenant: TenantId::new(tenant),
        name: "quote-handler".into(),
        source: "export default handler".into(),
        secrets: vec!["api-key".into()],
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn function_round_trip_preserves_the_record() {
    let store = SqlStorage::in_memory().await.unwrap();
    let f = function("t", "a");
    store.insert_function(f.clone()).await.unwrap();

    let fetched = store.function(&scope("t", "a"), &f.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, f.name);
    assert_eq!(fetched.secrets, f.secrets);
    assert_eq!(fetched.version, 1);
}

#[tokio::test]
async fn cross_tenant_read_is_forbidden() {
    let store = SqlStorage::in_memory().await.unwrap();
    let f = function("tenant-a", "acct");
    let id = f.id.clone();
    store.insert_function(f).await.unwrap();

    let err = store.function(&scope("tenant-b", "acct"), &id).await.unwrap_err();
    assert!(matches!(err, ProviderError::TenantForbidden));

    assert!(store.function(&scope("tenant-a", "other"), &id).await.unwrap().is_none());
}

#[tokio::test]
async fn stale_version_update_conflicts() {
    let store = SqlStorage::in_memory().await.unwrap();
    let mut f = function("t", "a");
    store.insert_function(f.clone()).await.unwrap();

    f.version = 2;
    store.update_function(f.clone(), 1).await.unwrap();

    let err = store.update_function(f, 1).await.unwrap_err();
    assert!(matches!(err, ProviderError::Conflict { expected: 1, found: 2 }));
}

#[tokio::test]
async fn executions_cannot_be_reinserted() {
    let store = SqlStorage::in_memory().await.unwrap();
    let now = Utc::now();
    let execution = Execution {
        id: ExecutionId::random(),
        function_id: FunctionId::new("f"),
        account_id: AccountId::new("a"),
        tenant: TenantId::new("t"),
        input: json!({"k": "v"}),
        output: Some(json!({"ok": true})),
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
async fn oracle_claims_are_exclusive() {
    let store = SqlStorage::in_memory().await.unwrap();
    let now = Utc::now();
    let request = OracleRequest {
        id: RequestId::random(),
        account_id: AccountId::new("a"),
        tenant: TenantId::new("t"),
        source_id: SourceId::new("s"),
        payload: json!({}),
        status: RequestStatus::Pending,
        attempts: 0,
        next_attempt_at: now - Duration::seconds(1),
        ttl_expires_at: now + Duration::hours(1),
        result: None,
        error: None,
        created_at: now,
        updated_at: now,
    };
    store.insert_request(request.clone()).await.unwrap();

    let claimed = store.claim_due_requests(now, 10, "w1").await.unwrap();
    assert_eq!(claimed.len(), 1);

    let second = store.claim_due_requests(now + Duration::milliseconds(1), 10, "w2").await.unwrap();
    assert!(second.is_empty());

    let mut done = claimed.into_iter().next().unwrap();
    done.status = RequestStatus::Succeeded;
    done.result = Some(json!({"price": 42}));
    store.update_request(done.clone()).await.unwrap();

    // Terminal rows reject further transitions and never re-enter the
    // queue.
    assert!(matches!(
        store.update_request(done).await.unwrap_err(),
        ProviderError::TerminalState { .. }
    ));
    let after = store.claim_due_requests(now + Duration::hours(1), 10, "w3").await.unwrap();
    assert!(after.is_empty());

    let listed = store
        .requests(&scope("t", "a"), Some(RequestStatus::Succeeded), Page::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn ledger_balance_is_derived() {
    let store = SqlStorage::in_memory().await.unwrap();
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
        .insert_gas_transaction(entry(GasTxKind::Deposit, 500, GasTxStatus::Settled))
        .await
        .unwrap();
    store
        .insert_gas_transaction(entry(GasTxKind::Withdraw, 120, GasTxStatus::Settled))
        .await
        .unwrap();
    store
        .insert_gas_transaction(entry(GasTxKind::Withdraw, 80, GasTxStatus::Pending))
        .await
        .unwrap();

    let balance = store.balance(&gas_account).await.unwrap();
    assert_eq!(balance.available, 380);
    assert_eq!(balance.pending_withdrawals, 80);
}
