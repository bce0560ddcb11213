use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use strato_bus::EventBus;
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_executor::{ExecuteError, FunctionExecutor, SecretResolver};
use strato_primitives::function::{Execution, FunctionDef};
use strato_primitives::id::{AccountId, ExecutionId, FunctionId};
use strato_primitives::{CallerContext, Payload, Scope};
use strato_provider::{Page, ProviderError, StorageProvider};
use strato_tasks::TaskSpawner;
use tracing::{info, warn};

use crate::{spawn_account_cascade, ServiceError};

pub(crate) const LOG_TARGET: &str = "functions";

/// Fields a function update may change; `None` leaves the stored value.
#[derive(Debug, Default, Clone)]
pub struct FunctionPatch {
    pub name: Option<String>,
    pub source: Option<String>,
    pub secrets: Option<Vec<String>>,
}

/// User-defined request handlers plus the execute entry point.
pub struct FunctionService {
    base: ServiceBase,
    storage: Arc<dyn StorageProvider>,
    resolver: Arc<dyn SecretResolver>,
    executor: Arc<FunctionExecutor>,
    events: EventBus,
    spawner: TaskSpawner,
}

impl FunctionService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        resolver: Arc<dyn SecretResolver>,
        executor: Arc<FunctionExecutor>,
        events: EventBus,
        spawner: TaskSpawner,
    ) -> Self {
        let descriptor = ModuleDescriptor::new("functions", "compute", Category::Service)
            .requires("storage")
            .requires("eventBus")
            .requires("secretResolver")
            .provides("functions");
        Self { base: ServiceBase::new(descriptor), storage, resolver, executor, events, spawner }
    }

    pub async fn create(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        name: &str,
        source: &str,
        secrets: Vec<String>,
    ) -> Result<FunctionDef, ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::Validation("function name must not be empty".into()));
        }

        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.validate_secrets(&scope, &secrets).await?;

        let now = Utc::now();
        let function = FunctionDef {
            id: FunctionId::random(),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            name: name.to_owned(),
            source: source.to_owned(),
            secrets,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_function(function.clone()).await?;
        info!(target: LOG_TARGET, function = %function.id, name, "Function created.");
        Ok(function)
    }

    /// Applies a patch with optimistic concurrency; a conflicting write is
    /// retried once against the reloaded row.
    pub async fn update(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FunctionId,
        patch: FunctionPatch,
    ) -> Result<FunctionDef, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());

        if let Some(secrets) = &patch.secrets {
            self.validate_secrets(&scope, secrets).await?;
        }

        match self.apply_patch(&scope, id, &patch).await {
            Err(ServiceError::Storage(ProviderError::Conflict { .. })) => {
                self.apply_patch(&scope, id, &patch).await
            }
            other => other,
        }
    }

    async fn apply_patch(
        &self,
        scope: &Scope,
        id: &FunctionId,
        patch: &FunctionPatch,
    ) -> Result<FunctionDef, ServiceError> {
        let mut function =
            self.storage.function(scope, id).await?.ok_or(ServiceError::NotFound("function"))?;
        let expected = function.version;

        if let Some(name) = &patch.name {
            function.name = name.clone();
        }
        if let Some(source) = &patch.source {
            function.source = source.clone();
        }
        if let Some(secrets) = &patch.secrets {
            function.secrets = secrets.clone();
        }
        function.version += 1;
        function.updated_at = Utc::now();

        self.storage.update_function(function.clone(), expected).await?;
        Ok(function)
    }

    pub async fn get(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FunctionId,
    ) -> Result<FunctionDef, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.storage.function(&scope, id).await?.ok_or(ServiceError::NotFound("function"))
    }

    pub async fn list(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        page: Page,
    ) -> Result<Vec<FunctionDef>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.storage.functions(&scope, page).await?)
    }

    pub async fn delete(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FunctionId,
    ) -> Result<(), ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.storage.delete_function(&scope, id).await?;
        Ok(())
    }

    /// Runs the function through the executor pipeline. The returned
    /// record is persisted whether the run succeeded or failed.
    pub async fn execute(
        &self,
        caller: &CallerContext,
        function_id: &FunctionId,
        payload: Payload,
    ) -> Result<Execution, ExecuteError> {
        self.executor.execute(caller, function_id, payload).await
    }

    pub async fn executions(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        function: Option<&FunctionId>,
        page: Page,
    ) -> Result<Vec<Execution>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.storage.executions(&scope, function, page).await?)
    }

    pub async fn execution(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &ExecutionId,
    ) -> Result<Execution, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.storage.execution(&scope, id).await?.ok_or(ServiceError::NotFound("execution"))
    }

    /// Every declared secret must exist in the vault at create/update
    /// time.
    async fn validate_secrets(&self, scope: &Scope, names: &[String]) -> Result<(), ServiceError> {
        for name in names {
            let known = self
                .resolver
                .exists(scope, name)
                .await
                .map_err(|err| ServiceError::Internal(err.to_string()))?;
            if !known {
                return Err(ServiceError::SecretMissing(name.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Module for FunctionService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        let storage = self.storage.clone();
        spawn_account_cascade(
            &self.events,
            &self.spawner,
            self.base.worker_token(),
            "functions-cascade",
            move |tenant, account| {
                let storage = storage.clone();
                async move {
                    let functions = storage.delete_account_functions(&tenant, &account).await;
                    let executions = storage.delete_account_executions(&tenant, &account).await;
                    if let Err(err) = functions.and(executions) {
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
    use strato_bus::Bus;
    use strato_crypto::SecretCipher;
    use strato_executor::{ActionRegistry, ExecutorConfig, NoopSandbox};
    use strato_primitives::Role;
    use strato_provider::providers::InMemoryProvider;
    use strato_tasks::TaskManager;

    use super::*;
    use crate::secrets::SecretVaultService;

    fn caller() -> CallerContext {
        CallerContext::new("t", "tester", Role::User)
    }

    async fn fixture() -> (FunctionService, Arc<SecretVaultService>, AccountId) {
        let storage = Arc::new(InMemoryProvider::new());
        let bus = Bus::new();
        let spawner = TaskManager::current().task_spawner();

        let vault = Arc::new(SecretVaultService::new(
            storage.clone(),
            bus.events().clone(),
            spawner.clone(),
            SecretCipher::new([1u8; 32]),
        ));

        let executor = Arc::new(FunctionExecutor::new(
            storage.clone(),
            Arc::new(NoopSandbox),
            vault.clone(),
            Arc::new(ActionRegistry::new()),
            bus.events().clone(),
            ExecutorConfig::default(),
        ));

        let service = FunctionService::new(
            storage,
            vault.clone(),
            executor,
            bus.events().clone(),
            spawner,
        );
        (service, vault, AccountId::new("acct"))
    }

    #[tokio::test]
    async fn secret_lifecycle_is_validated_on_create_and_update() {
        let (service, vault, account) = fixture().await;
        vault.put(&caller(), &account, "foo", "value").await.unwrap();

        // Create with a known secret succeeds.
        let function = service
            .create(&caller(), &account, "fn", "src", vec!["foo".into()])
            .await
            .unwrap();

        // Updating to an unknown secret fails with secret_missing and
        // leaves the stored set intact.
        let patch = FunctionPatch { secrets: Some(vec!["missing".into()]), ..Default::default() };
        let err = service.update(&caller(), &account, &function.id, patch).await.unwrap_err();
        assert!(matches!(err, ServiceError::SecretMissing(name) if name == "missing"));

        let stored = service.get(&caller(), &account, &function.id).await.unwrap();
        assert_eq!(stored.secrets, vec!["foo".to_owned()]);

        // Clearing the set is always allowed.
        let patch = FunctionPatch { secrets: Some(vec![]), ..Default::default() };
        let cleared = service.update(&caller(), &account, &function.id, patch).await.unwrap();
        assert!(cleared.secrets.is_empty());
        assert_eq!(cleared.version, 2);
    }

    #[tokio::test]
    async fn create_with_unknown_secret_is_rejected() {
        let (service, _vault, account) = fixture().await;
        let err = service
            .create(&caller(), &account, "fn", "src", vec!["ghost".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SecretMissing(_)));
    }
}
