use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use strato_bus::EventBus;
use strato_crypto::SecretCipher;
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_executor::{ResolveError, SecretResolver};
use strato_primitives::id::{AccountId, SecretId};
use strato_primitives::secret::{Secret, SecretMaterial, SecretValue};
use strato_primitives::{CallerContext, Scope};
use strato_provider::{Page, StorageProvider};
use strato_tasks::TaskSpawner;
use tracing::{info, warn};

use crate::{spawn_account_cascade, ServiceError};

pub(crate) const LOG_TARGET: &str = "secrets";

/// Write-through secret vault.
///
/// Values are sealed with the process-wide AES-256-GCM key before they
/// reach storage; plaintext exists only inside the resolver boundary and is
/// never logged or persisted.
pub struct SecretVaultService {
    base: ServiceBase,
    storage: Arc<dyn StorageProvider>,
    events: EventBus,
    spawner: TaskSpawner,
    cipher: SecretCipher,
}

impl SecretVaultService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        events: EventBus,
        spawner: TaskSpawner,
        cipher: SecretCipher,
    ) -> Self {
        let descriptor = ModuleDescriptor::new("secrets", "security", Category::Store)
            .requires("storage")
            .requires("eventBus")
            .provides("secretResolver");
        Self { base: ServiceBase::new(descriptor), storage, events, spawner, cipher }
    }

    pub async fn put(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        name: &str,
        value: &str,
    ) -> Result<Secret, ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::Validation("secret name must not be empty".into()));
        }

        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let ciphertext = self
            .cipher
            .seal(value.as_bytes())
            .map_err(|err| ServiceError::Internal(err.to_string()))?;

        let previous = self.storage.secret(&scope, name).await?;
        let now = Utc::now();
        let secret = Secret {
            id: previous.as_ref().map(|s| s.id.clone()).unwrap_or_else(SecretId::random),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            name: name.to_owned(),
            ciphertext,
            version: previous.as_ref().map(|s| s.version + 1).unwrap_or(1),
            created_at: previous.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.storage.put_secret(secret.clone()).await?;
        info!(target: LOG_TARGET, name, version = secret.version, "Secret stored.");
        Ok(secret)
    }

    /// Returns the stored record (ciphertext only); resolving plaintext is
    /// reserved for the [`SecretResolver`] path.
    pub async fn get(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        name: &str,
    ) -> Result<Secret, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.storage.secret(&scope, name).await?.ok_or(ServiceError::NotFound("secret"))
    }

    pub async fn list(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        page: Page,
    ) -> Result<Vec<Secret>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.storage.secrets(&scope, page).await?)
    }

    pub async fn delete(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        name: &str,
    ) -> Result<(), ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.storage.delete_secret(&scope, name).await?;
        Ok(())
    }
}

#[async_trait]
impl SecretResolver for SecretVaultService {
    async fn exists(&self, scope: &Scope, name: &str) -> Result<bool, ResolveError> {
        self.storage
            .secret(scope, name)
            .await
            .map(|secret| secret.is_some())
            .map_err(|err| ResolveError::Store(err.to_string()))
    }

    async fn resolve(
        &self,
        scope: &Scope,
        names: &[String],
    ) -> Result<SecretMaterial, ResolveError> {
        let mut material = SecretMaterial::new();
        for name in names {
            let secret = self
                .storage
                .secret(scope, name)
                .await
                .map_err(|err| ResolveError::Store(err.to_string()))?
                .ok_or_else(|| ResolveError::Missing(name.clone()))?;

            let plaintext = self
                .cipher
                .open(&secret.ciphertext)
                .map_err(|err| ResolveError::Store(err.to_string()))?;
            let plaintext = String::from_utf8(plaintext)
                .map_err(|_| ResolveError::Store(format!("secret `{name}` is not utf-8")))?;
            material.insert(name.clone(), SecretValue::new(plaintext));
        }
        Ok(material)
    }
}

#[async_trait]
impl Module for SecretVaultService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        let storage = self.storage.clone();
        spawn_account_cascade(
            &self.events,
            &self.spawner,
            self.base.worker_token(),
            "secrets-cascade",
            move |tenant, account| {
                let storage = storage.clone();
                async move {
                    if let Err(err) = storage.delete_account_secrets(&tenant, &account).await {
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
    use strato_primitives::Role;
    use strato_provider::providers::InMemoryProvider;
    use strato_tasks::TaskManager;

    use super::*;

    fn caller() -> CallerContext {
        CallerContext::new("t", "tester", Role::User)
    }

    fn vault() -> SecretVaultService {
        SecretVaultService::new(
            Arc::new(InMemoryProvider::new()),
            Bus::new().events().clone(),
            TaskManager::current().task_spawner(),
            SecretCipher::new([9u8; 32]),
        )
    }

    #[tokio::test]
    async fn put_then_resolve_returns_plaintext() {
        let vault = vault();
        let account = AccountId::new("a");
        let stored = vault.put(&caller(), &account, "api-key", "hunter2").await.unwrap();

        // Ciphertext never equals plaintext.
        assert_ne!(stored.ciphertext, b"hunter2");

        let scope = Scope::new(caller().tenant, account);
        let material = vault.resolve(&scope, &["api-key".to_owned()]).await.unwrap();
        assert_eq!(material["api-key"].expose(), "hunter2");
    }

    #[tokio::test]
    async fn versions_bump_on_replace() {
        let vault = vault();
        let account = AccountId::new("a");
        vault.put(&caller(), &account, "api-key", "one").await.unwrap();
        let replaced = vault.put(&caller(), &account, "api-key", "two").await.unwrap();
        assert_eq!(replaced.version, 2);

        let scope = Scope::new(caller().tenant, account);
        let material = vault.resolve(&scope, &["api-key".to_owned()]).await.unwrap();
        assert_eq!(material["api-key"].expose(), "two");
    }

    #[tokio::test]
    async fn resolving_unknown_name_is_missing() {
        let vault = vault();
        let scope = Scope::new(caller().tenant, AccountId::new("a"));
        let err = vault.resolve(&scope, &["ghost".to_owned()]).await.unwrap_err();
        assert!(matches!(err, ResolveError::Missing(name) if name == "ghost"));
    }
}
