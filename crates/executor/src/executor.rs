use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use strato_bus::{Envelope, EventBus};
use strato_metrics::metrics::{Counter, Histogram};
use strato_metrics::Metrics;
use strato_primitives::function::{ActionRecord, ActionStatus, Execution, ExecutionStatus};
use strato_primitives::id::{ActionId, ExecutionId, FunctionId};
use strato_primitives::payload::freeze;
use strato_primitives::secret::SecretMaterial;
use strato_primitives::{CallerContext, ErrorCode, Payload, Scope};
use strato_provider::ProviderError;
use tracing::{debug, error, warn};

use crate::actions::{ActionContext, ActionRegistry};
use crate::resolver::{ResolveError, SecretResolver};
use crate::sandbox::FunctionSandbox;
use crate::{ExecutorStorage, LOG_TARGET};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock budget for a single sandbox run.
    pub sandbox_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { sandbox_timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("function not found")]
    NotFound,

    #[error("cross-tenant access rejected")]
    TenantForbidden,

    #[error("secret `{name}` does not exist")]
    SecretMissing { name: String },

    #[error("storage error: {0}")]
    Storage(ProviderError),

    /// Persistence of a finished execution failed. Both signals survive:
    /// the executor outcome rides in `execution`, the storage failure in
    /// `source`.
    #[error(
        "failed to persist execution {id} (status {status}): {source}",
        id = execution.id,
        status = execution.status
    )]
    Persist { execution: Box<Execution>, source: ProviderError },
}

impl ExecuteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecuteError::NotFound => ErrorCode::NotFound,
            ExecuteError::TenantForbidden => ErrorCode::TenantForbidden,
            ExecuteError::SecretMissing { .. } => ErrorCode::SecretMissing,
            ExecuteError::Storage(err) => err.code(),
            ExecuteError::Persist { .. } => ErrorCode::Internal,
        }
    }

    fn storage(err: ProviderError) -> Self {
        match err {
            ProviderError::TenantForbidden => ExecuteError::TenantForbidden,
            other => ExecuteError::Storage(other),
        }
    }
}

#[derive(Metrics)]
#[metrics(scope = "executor")]
struct ExecutorMetrics {
    /// Executions that reached the sandbox.
    executions: Counter,
    /// Executions that finished with status `failed`.
    failures: Counter,
    /// Actions dispatched across all executions.
    actions_dispatched: Counter,
    /// Actions that failed and took their execution down.
    action_failures: Counter,
    /// End-to-end execution latency.
    duration_seconds: Histogram,
}

/// The function executor.
///
/// `execute` returns `Ok` with the persisted record whether the run
/// succeeded or failed; `Err` is reserved for precondition failures (no
/// record exists yet) and persistence failures (the record rides in the
/// error).
pub struct FunctionExecutor {
    storage: Arc<dyn ExecutorStorage>,
    sandbox: Arc<dyn FunctionSandbox>,
    secrets: Arc<dyn SecretResolver>,
    actions: Arc<ActionRegistry>,
    events: EventBus,
    config: ExecutorConfig,
    metrics: ExecutorMetrics,
}

impl FunctionExecutor {
    pub fn new(
        storage: Arc<dyn ExecutorStorage>,
        sandbox: Arc<dyn FunctionSandbox>,
        secrets: Arc<dyn SecretResolver>,
        actions: Arc<ActionRegistry>,
        events: EventBus,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            storage,
            sandbox,
            secrets,
            actions,
            events,
            config,
            metrics: ExecutorMetrics::default(),
        }
    }

    pub fn action_registry(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub async fn execute(
        &self,
        caller: &CallerContext,
        function_id: &FunctionId,
        payload: Payload,
    ) -> Result<Execution, ExecuteError> {
        let function = self
            .storage
            .function_in_tenant(&caller.tenant, function_id)
            .await
            .map_err(ExecuteError::storage)?
            .ok_or(ExecuteError::NotFound)?;
        let scope = Scope::new(caller.tenant.clone(), function.account_id.clone());

        let secrets = self.resolve_secrets(&scope, &function.secrets).await?;

        // The frozen copy is what the sandbox sees and what persists; the
        // caller's payload stays untouched.
        let input = freeze(&payload);
        let execution_id = ExecutionId::random();
        let started_at = Utc::now();

        self.metrics.executions.increment(1);
        let run = tokio::time::timeout(
            self.config.sandbox_timeout,
            self.sandbox.run(&function, &input, &secrets),
        )
        .await;

        let (output, requested, sandbox_error) = match run {
            Ok(Ok(outcome)) => (Some(freeze(&outcome.output)), outcome.actions, None),
            Ok(Err(err)) => (None, Vec::new(), Some(err.to_string())),
            Err(_) => (None, Vec::new(), Some(ErrorCode::Timeout.to_string())),
        };

        let (actions, action_error) = if sandbox_error.is_none() {
            let ctx = ActionContext {
                caller: caller.clone(),
                scope: scope.clone(),
                execution_id: execution_id.clone(),
                function_id: function.id.clone(),
            };
            self.dispatch_actions(&ctx, &requested).await
        } else {
            (Vec::new(), None)
        };

        let error = sandbox_error.or(action_error);
        let status =
            if error.is_none() { ExecutionStatus::Succeeded } else { ExecutionStatus::Failed };

        let execution = Execution {
            id: execution_id,
            function_id: function.id.clone(),
            account_id: function.account_id.clone(),
            tenant: caller.tenant.clone(),
            input,
            output,
            status,
            error,
            actions,
            started_at,
            completed_at: Utc::now(),
        };

        if status == ExecutionStatus::Failed {
            self.metrics.failures.increment(1);
        }
        self.metrics
            .duration_seconds
            .record((execution.completed_at - started_at).num_milliseconds() as f64 / 1_000.0);

        match self.storage.insert_execution(execution.clone()).await {
            Ok(()) => {
                debug!(
                    target: LOG_TARGET,
                    execution = %execution.id,
                    function = %function.id,
                    status = %execution.status,
                    "Execution persisted."
                );
                self.events.publish(
                    "function.executed",
                    Envelope::new(
                        "function.executed",
                        json!({
                            "execution_id": execution.id,
                            "function_id": function.id,
                            "status": execution.status,
                        }),
                    ),
                );
                Ok(execution)
            }
            Err(source) => {
                // Observability must not lose either signal; the record
                // rides inside the error.
                error!(
                    target: LOG_TARGET,
                    execution = %execution.id,
                    %source,
                    "Failed to persist execution."
                );
                Err(ExecuteError::Persist { execution: Box::new(execution), source })
            }
        }
    }

    async fn resolve_secrets(
        &self,
        scope: &Scope,
        names: &[String],
    ) -> Result<SecretMaterial, ExecuteError> {
        if names.is_empty() {
            return Ok(SecretMaterial::new());
        }
        self.secrets.resolve(scope, names).await.map_err(|err| match err {
            ResolveError::Missing(name) => ExecuteError::SecretMissing { name },
            ResolveError::Store(message) => {
                ExecuteError::Storage(ProviderError::Backend(message))
            }
        })
    }

    /// Dispatches queued actions strictly serially. The first failure fails
    /// the execution; later actions are recorded as skipped, and effects of
    /// already-dispatched actions are not rolled back.
    async fn dispatch_actions(
        &self,
        ctx: &ActionContext,
        requested: &[crate::sandbox::ActionRequest],
    ) -> (Vec<ActionRecord>, Option<String>) {
        let mut records = Vec::with_capacity(requested.len());
        let mut failed = false;

        for request in requested {
            if failed {
                records.push(ActionRecord {
                    id: ActionId::random(),
                    kind: request.kind.clone(),
                    params: request.params.clone(),
                    status: ActionStatus::Skipped,
                    result: None,
                    error: None,
                });
                continue;
            }

            self.metrics.actions_dispatched.increment(1);
            match self.actions.dispatch(&request.kind, ctx, &request.params).await {
                Ok(result) => records.push(ActionRecord {
                    id: ActionId::random(),
                    kind: request.kind.clone(),
                    params: request.params.clone(),
                    status: ActionStatus::Succeeded,
                    result: Some(result),
                    error: None,
                }),
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        execution = %ctx.execution_id,
                        kind = %request.kind,
                        %err,
                        "Action failed; failing the execution."
                    );
                    self.metrics.action_failures.increment(1);
                    failed = true;
                    records.push(ActionRecord {
                        id: ActionId::random(),
                        kind: request.kind.clone(),
                        params: request.params.clone(),
                        status: ActionStatus::Failed,
                        result: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let error = failed.then(|| ErrorCode::ActionFailed.to_string());
        (records, error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use strato_bus::Bus;
    use strato_primitives::function::FunctionDef;
    use strato_primitives::id::AccountId;
    use strato_primitives::secret::SecretValue;
    use strato_primitives::{Role, TenantId};
    use strato_provider::providers::InMemoryProvider;
    use strato_provider::traits::function::{ExecutionProvider, FunctionProvider};
    use strato_provider::Page;

    use super::*;
    use crate::actions::{ActionError, ActionHandler};
    use crate::sandbox::{ActionRequest, SandboxError, SandboxOutput};

    struct ScriptedSandbox {
        outcome: Box<dyn Fn() -> Result<SandboxOutput, SandboxError> + Send + Sync>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl FunctionSandbox for ScriptedSandbox {
        async fn run(
            &self,
            _def: &FunctionDef,
            _input: &Payload,
            _secrets: &SecretMaterial,
        ) -> Result<SandboxOutput, SandboxError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.outcome)()
        }
    }

    struct StubResolver {
        known: Vec<String>,
    }

    #[async_trait]
    impl SecretResolver for StubResolver {
        async fn exists(&self, _scope: &Scope, name: &str) -> Result<bool, ResolveError> {
            Ok(self.known.iter().any(|known| known == name))
        }

        async fn resolve(
            &self,
            _scope: &Scope,
            names: &[String],
        ) -> Result<SecretMaterial, ResolveError> {
            let mut material = SecretMaterial::new();
            for name in names {
                if !self.known.iter().any(|known| known == name) {
                    return Err(ResolveError::Missing(name.clone()));
                }
                material.insert(name.clone(), SecretValue::new("plaintext"));
            }
            Ok(material)
        }
    }

    struct RecordingHandler {
        calls: Arc<Mutex<Vec<Payload>>>,
        fail: bool,
    }

    #[async_trait]
    impl ActionHandler for RecordingHandler {
        async fn handle(
            &self,
            _ctx: &ActionContext,
            params: &Payload,
        ) -> Result<Payload, ActionError> {
            self.calls.lock().unwrap().push(params.clone());
            if self.fail {
                Err(ActionError::Failed("resolver unreachable".into()))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    struct Fixture {
        storage: Arc<InMemoryProvider>,
        executor: FunctionExecutor,
        function: FunctionDef,
    }

    async fn fixture(
        sandbox: ScriptedSandbox,
        secrets: Vec<String>,
        known_secrets: Vec<String>,
        registry: ActionRegistry,
    ) -> Fixture {
        let storage = Arc::new(InMemoryProvider::new());
        let now = Utc::now();
        let function = FunctionDef {
            id: FunctionId::random(),
            account_id: AccountId::new("acct"),
            tenant: TenantId::new("tenant"),
            name: "handler".into(),
            source: "export default run".into(),
            secrets,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        storage.insert_function(function.clone()).await.unwrap();

        let executor = FunctionExecutor::new(
            storage.clone(),
            Arc::new(sandbox),
            Arc::new(StubResolver { known: known_secrets }),
            Arc::new(registry),
            Bus::new().events().clone(),
            ExecutorConfig { sandbox_timeout: Duration::from_millis(200) },
        );
        Fixture { storage, executor, function }
    }

    fn caller() -> CallerContext {
        CallerContext::new("tenant", "tester", Role::User)
    }

    fn scope() -> Scope {
        Scope::new(TenantId::new("tenant"), AccountId::new("acct"))
    }

    #[tokio::test]
    async fn input_is_frozen_and_persisted_verbatim() {
        let sandbox = ScriptedSandbox {
            outcome: Box::new(|| Ok(SandboxOutput::new(json!({"echo": true})))),
            delay: None,
        };
        let fx = fixture(sandbox, vec![], vec![], ActionRegistry::new()).await;

        let payload = json!({"pair": "NEO/USD", "nested": {"n": 1}});
        let execution =
            fx.executor.execute(&caller(), &fx.function.id, payload.clone()).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.input, payload);
        assert_eq!(execution.output, Some(json!({"echo": true})));

        // Exactly one record, persisted with the same frozen input.
        let stored = fx.storage.executions(&scope(), None, Page::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].input, payload);
    }

    #[tokio::test]
    async fn unsupported_action_fails_the_execution() {
        let sandbox = ScriptedSandbox {
            outcome: Box::new(|| {
                Ok(SandboxOutput {
                    output: json!({}),
                    actions: vec![ActionRequest { kind: "unknown.action".into(), params: json!({}) }],
                })
            }),
            delay: None,
        };
        let fx = fixture(sandbox, vec![], vec![], ActionRegistry::new()).await;

        let execution = fx.executor.execute(&caller(), &fx.function.id, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("action_failed"));
        assert_eq!(execution.actions.len(), 1);
        assert_eq!(execution.actions[0].status, ActionStatus::Failed);
        assert_eq!(execution.actions[0].error.as_deref(), Some("action_unsupported"));
    }

    #[tokio::test]
    async fn first_action_failure_skips_the_rest() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ActionRegistry::new();
        registry.register(
            "good",
            Arc::new(RecordingHandler { calls: calls.clone(), fail: false }),
        );
        registry.register("bad", Arc::new(RecordingHandler { calls: calls.clone(), fail: true }));

        let sandbox = ScriptedSandbox {
            outcome: Box::new(|| {
                Ok(SandboxOutput {
                    output: json!({}),
                    actions: vec![
                        ActionRequest { kind: "good".into(), params: json!({"n": 1}) },
                        ActionRequest { kind: "bad".into(), params: json!({"n": 2}) },
                        ActionRequest { kind: "good".into(), params: json!({"n": 3}) },
                    ],
                })
            }),
            delay: None,
        };
        let fx = fixture(sandbox, vec![], vec![], registry).await;

        let execution = fx.executor.execute(&caller(), &fx.function.id, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let statuses: Vec<_> = execution.actions.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![ActionStatus::Succeeded, ActionStatus::Failed, ActionStatus::Skipped]
        );

        // The third action was never dispatched.
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sandbox_overrun_is_a_timeout_failure() {
        let sandbox = ScriptedSandbox {
            outcome: Box::new(|| Ok(SandboxOutput::new(json!({})))),
            delay: Some(Duration::from_secs(5)),
        };
        let fx = fixture(sandbox, vec![], vec![], ActionRegistry::new()).await;

        let execution = fx.executor.execute(&caller(), &fx.function.id, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("timeout"));
        assert!(execution.output.is_none());
    }

    #[tokio::test]
    async fn missing_secret_fails_before_any_record_exists() {
        let sandbox = ScriptedSandbox {
            outcome: Box::new(|| Ok(SandboxOutput::new(json!({})))),
            delay: None,
        };
        let fx =
            fixture(sandbox, vec!["missing".into()], vec!["other".into()], ActionRegistry::new())
                .await;

        let err = fx.executor.execute(&caller(), &fx.function.id, json!({})).await.unwrap_err();
        assert!(matches!(err, ExecuteError::SecretMissing { ref name } if name == "missing"));

        let stored = fx.storage.executions(&scope(), None, Page::default()).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let sandbox = ScriptedSandbox {
            outcome: Box::new(|| Ok(SandboxOutput::new(json!({})))),
            delay: None,
        };
        let fx = fixture(sandbox, vec![], vec![], ActionRegistry::new()).await;

        let err = fx
            .executor
            .execute(&caller(), &FunctionId::new("ghost"), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::NotFound));
    }

    #[tokio::test]
    async fn sandbox_failures_still_persist_the_execution() {
        let sandbox = ScriptedSandbox {
            outcome: Box::new(|| Err(SandboxError::Failed("script threw".into()))),
            delay: None,
        };
        let fx = fixture(sandbox, vec![], vec![], ActionRegistry::new()).await;

        let execution = fx.executor.execute(&caller(), &fx.function.id, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("script threw"));

        let stored = fx.storage.executions(&scope(), None, Page::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ExecutionStatus::Failed);
    }
}
