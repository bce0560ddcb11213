//! End-to-end action pipeline: a function queues writes against four other
//! services and the executor fans them out as one unit.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use strato_bus::Bus;
use strato_crypto::{SecretCipher, SigningPair};
use strato_executor::{
    ActionRegistry, ExecutorConfig, FunctionExecutor, FunctionSandbox, SandboxError, SandboxOutput,
};
use strato_primitives::function::{ActionStatus, ExecutionStatus, FunctionDef};
use strato_primitives::id::{AccountId, FunctionId};
use strato_primitives::oracle::RequestStatus;
use strato_primitives::secret::SecretMaterial;
use strato_primitives::{CallerContext, Payload, Role, TenantId};
use strato_provider::providers::InMemoryProvider;
use strato_provider::traits::function::FunctionProvider;
use strato_provider::Page;
use strato_services::actions::register_builtin;
use strato_services::automation::{AutomationConfig, AutomationService};
use strato_services::feed::{FeedConfig, FeedService, FetchError, PriceFetcher};
use strato_services::gasbank::{GasBankConfig, GasBankService, ResolverError, SettlementResolver};
use strato_services::oracle::{
    FetchResponse, OracleConfig, OracleService, OracleTransport, RenderedCall, SourceSpec,
    TransportError,
};
use strato_services::secrets::SecretVaultService;
use strato_services::triggers::TriggerService;
use strato_tasks::TaskManager;

/// Sandbox whose queued actions the test can swap at runtime.
struct ScriptedSandbox {
    actions: Arc<std::sync::Mutex<Payload>>,
}

#[async_trait]
impl FunctionSandbox for ScriptedSandbox {
    async fn run(
        &self,
        _def: &FunctionDef,
        _input: &Payload,
        _secrets: &SecretMaterial,
    ) -> Result<SandboxOutput, SandboxError> {
        let actions = self.actions.lock().unwrap().clone();
        let actions = serde_json::from_value(actions)
            .map_err(|err| SandboxError::Failed(err.to_string()))?;
        Ok(SandboxOutput { output: json!({"ok": true}), actions })
    }
}

struct NullTransport;

#[async_trait]
impl OracleTransport for NullTransport {
    async fn fetch(&self, _call: &RenderedCall) -> Result<FetchResponse, TransportError> {
        Err(TransportError::Network("not under test".into()))
    }
}

struct NullResolver;

#[async_trait]
impl SettlementResolver for NullResolver {
    async fn settle(
        &self,
        _wallet: &str,
        _amount: i64,
        _reference: &str,
    ) -> Result<(), ResolverError> {
        Ok(())
    }
}

struct NullFetcher;

#[async_trait]
impl PriceFetcher for NullFetcher {
    async fn quotes(&self, _pair: &str) -> Result<Vec<i64>, FetchError> {
        Ok(vec![])
    }
}

struct Stack {
    executor: Arc<FunctionExecutor>,
    actions: Arc<std::sync::Mutex<Payload>>,
    gasbank: Arc<GasBankService>,
    automation: Arc<AutomationService>,
    triggers: Arc<TriggerService>,
    oracle: Arc<OracleService>,
    caller: CallerContext,
    account: AccountId,
    function: FunctionId,
}

/// Wires the full service stack over in-memory storage with a sandbox that
/// returns the given action list.
async fn stack(actions: Payload) -> Stack {
    let storage = Arc::new(InMemoryProvider::new());
    let bus = Bus::new();
    let spawner = TaskManager::current().task_spawner();
    let actions = Arc::new(std::sync::Mutex::new(actions));

    let vault = Arc::new(SecretVaultService::new(
        storage.clone(),
        bus.events().clone(),
        spawner.clone(),
        SecretCipher::new([1u8; 32]),
    ));

    let registry = Arc::new(ActionRegistry::new());
    let executor = Arc::new(FunctionExecutor::new(
        storage.clone(),
        Arc::new(ScriptedSandbox { actions: actions.clone() }),
        vault,
        registry.clone(),
        bus.events().clone(),
        ExecutorConfig::default(),
    ));

    let gasbank = Arc::new(GasBankService::new(
        storage.clone(),
        Arc::new(NullResolver),
        bus.events().clone(),
        spawner.clone(),
        GasBankConfig::default(),
    ));
    let automation = Arc::new(AutomationService::new(
        storage.clone(),
        executor.clone(),
        bus.events().clone(),
        spawner.clone(),
        AutomationConfig::default(),
    ));
    let triggers =
        Arc::new(TriggerService::new(storage.clone(), bus.events().clone(), spawner.clone()));
    let oracle = Arc::new(OracleService::new(
        storage.clone(),
        Arc::new(NullTransport),
        None,
        bus.events().clone(),
        spawner.clone(),
        OracleConfig::default(),
    ));
    let feeds = Arc::new(FeedService::new(
        storage.clone(),
        Arc::new(NullFetcher),
        Arc::new(SigningPair::from_bytes([3u8; 32])),
        bus.events().clone(),
        spawner,
        FeedConfig::default(),
    ));

    register_builtin(
        &registry,
        gasbank.clone(),
        automation.clone(),
        triggers.clone(),
        oracle.clone(),
        feeds,
    );

    let caller = CallerContext::new("t", "tester", Role::User);
    let account = AccountId::new("acct");
    let now = Utc::now();
    let function = FunctionDef {
        id: FunctionId::random(),
        account_id: account.clone(),
        tenant: TenantId::new("t"),
        name: "pipeline".into(),
        source: "run".into(),
        secrets: vec![],
        version: 1,
        created_at: now,
        updated_at: now,
    };
    storage.insert_function(function.clone()).await.unwrap();

    Stack {
        executor,
        actions,
        gasbank,
        automation,
        triggers,
        oracle,
        caller,
        account,
        function: function.id,
    }
}

#[tokio::test]
async fn action_pipeline_fans_out_to_four_services() {
    let stack = stack(json!([])).await;

    // The oracle request action needs a pre-existing data source.
    let source = stack
        .oracle
        .create_source(
            &stack.caller,
            &stack.account,
            SourceSpec {
                name: "quotes".into(),
                url: "https://example.com/q".into(),
                method: "POST".into(),
                headers: BTreeMap::new(),
                body_template: None,
            },
        )
        .await
        .unwrap();

    *stack.actions.lock().unwrap() = json!([
        {"type": "gasbank.ensureAccount", "params": {"wallet": "Nx"}},
        {"type": "automation.schedule", "params": {"name": "hourly", "schedule": "0 * * * *"}},
        {"type": "trigger.register", "params": {"type": "cron", "rule": "0 * * * *"}},
        {"type": "oracle.createRequest",
         "params": {"dataSourceId": source.id, "payload": {"pair": "NEO/USD"}}},
    ]);

    let execution = stack
        .executor
        .execute(&stack.caller, &stack.function, json!({"trigger": "manual"}))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.actions.len(), 4);
    assert!(execution.actions.iter().all(|action| action.status == ActionStatus::Succeeded));

    // Gas account exists for the wallet.
    let (gas_account, _) =
        stack.gasbank.account_state(&stack.caller, &stack.account, "Nx").await.unwrap();
    assert_eq!(gas_account.wallet_address, "Nx");

    // Exactly one enabled job.
    let jobs =
        stack.automation.list(&stack.caller, &stack.account, Page::default()).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].enabled);
    assert_eq!(jobs[0].name, "hourly");

    // Exactly one trigger.
    let triggers =
        stack.triggers.list(&stack.caller, &stack.account, Page::default()).await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].kind, "cron");

    // One pending oracle request.
    let requests = stack
        .oracle
        .requests(&stack.caller, &stack.account, Some(RequestStatus::Pending), Page::default())
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn unknown_action_type_fails_the_execution() {
    let stack = stack(json!([
        {"type": "unknown.action", "params": {}},
    ]))
    .await;

    let execution =
        stack.executor.execute(&stack.caller, &stack.function, json!({})).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.actions.len(), 1);
    assert_eq!(execution.actions[0].status, ActionStatus::Failed);
    assert_eq!(execution.actions[0].error.as_deref(), Some("action_unsupported"));
}
