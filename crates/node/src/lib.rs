//! Node assembly: builds storage, bus, crypto material, the executor and
//! every service, wires them into the engine registry, and drives
//! launch/shutdown.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod config;
mod modules;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, StorageBackend};
use modules::{BusModule, StorageModule};
use strato_bus::Bus;
use strato_crypto::{SecretCipher, SigningPair};
use strato_db::SqlStorage;
use strato_engine::{Registry, StatusSnapshot};
use strato_executor::{
    ActionRegistry, ExecutorConfig, ExecutorStorage, FunctionExecutor, FunctionSandbox,
    NoopSandbox,
};
use strato_provider::providers::InMemoryProvider;
use strato_provider::StorageProvider;
use strato_services::accounts::AccountService;
use strato_services::actions::register_builtin;
use strato_services::automation::{AutomationConfig, AutomationService};
use strato_services::feed::{FeedConfig, FeedService, FetchError, PriceFetcher};
use strato_services::functions::FunctionService;
use strato_services::gasbank::{GasBankConfig, GasBankService, ResolverError, SettlementResolver};
use strato_services::oracle::{HttpTransport, OracleConfig, OracleService, OracleTransport, RunnerClient};
use strato_services::randomness::RandomnessService;
use strato_services::secrets::SecretVaultService;
use strato_services::triggers::TriggerService;
use strato_tasks::TaskManager;
use tracing::info;

pub(crate) const LOG_TARGET: &str = "node";

/// Fresh random 32-byte key for ephemeral dev nodes.
fn random_key() -> [u8; 32] {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Dev-mode settlement resolver: every withdrawal settles immediately.
struct InstantResolver;

#[async_trait::async_trait]
impl SettlementResolver for InstantResolver {
    async fn settle(
        &self,
        _wallet: &str,
        _amount: i64,
        _reference: &str,
    ) -> Result<(), ResolverError> {
        Ok(())
    }
}

/// Dev-mode price fetcher: no quotes, so feeds only move via submissions
/// and explicit publishes.
struct NoQuotes;

#[async_trait::async_trait]
impl PriceFetcher for NoQuotes {
    async fn quotes(&self, _pair: &str) -> std::result::Result<Vec<i64>, FetchError> {
        Ok(Vec::new())
    }
}

/// Builder injecting the external collaborators. Defaults are dev-mode
/// stand-ins; production embedders supply real ones.
pub struct NodeBuilder {
    config: Config,
    sandbox: Option<Arc<dyn FunctionSandbox>>,
    resolver: Option<Arc<dyn SettlementResolver>>,
    fetcher: Option<Arc<dyn PriceFetcher>>,
    transport: Option<Arc<dyn OracleTransport>>,
}

impl NodeBuilder {
    pub fn new(config: Config) -> Self {
        Self { config, sandbox: None, resolver: None, fetcher: None, transport: None }
    }

    /// Script runtime executing function sources.
    pub fn sandbox(mut self, sandbox: Arc<dyn FunctionSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Chain adapter settling withdrawals.
    pub fn settlement_resolver(mut self, resolver: Arc<dyn SettlementResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// External quote source for the feed refresh loop.
    pub fn price_fetcher(mut self, fetcher: Arc<dyn PriceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// HTTP transport used by the oracle dispatcher.
    pub fn oracle_transport(mut self, transport: Arc<dyn OracleTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub async fn build(self) -> Result<Node> {
        Node::assemble(self).await
    }
}

/// A node instance.
///
/// Holds every component handle; nothing runs until [`launch`](Self::launch).
#[must_use = "Node does nothing unless launched."]
pub struct Node {
    config: Config,
    bus: Bus,
    registry: Arc<Registry>,
    task_manager: TaskManager,
    accounts: Arc<AccountService>,
    functions: Arc<FunctionService>,
    secrets: Arc<SecretVaultService>,
    randomness: Arc<RandomnessService>,
    triggers: Arc<TriggerService>,
    automation: Arc<AutomationService>,
    oracle: Arc<OracleService>,
    gasbank: Arc<GasBankService>,
    feeds: Arc<FeedService>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").finish_non_exhaustive()
    }
}

impl Node {
    pub fn builder(config: Config) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    /// Builds a node with dev-mode collaborators.
    pub async fn build(config: Config) -> Result<Node> {
        NodeBuilder::new(config).build().await
    }

    async fn assemble(builder: NodeBuilder) -> Result<Node> {
        let config = builder.config;
        let task_manager = TaskManager::current();
        let spawner = task_manager.task_spawner();
        let bus = Bus::new();

        // --- crypto material (validated before anything touches disk)

        let cipher = match (&config.secrets.key, config.storage.backend) {
            (Some(key), _) => SecretCipher::from_hex(key).context("invalid secrets.key")?,
            (None, StorageBackend::Sqlite) => {
                // Sealed rows would be unreadable after a restart.
                bail!("secrets.key is required with a persistent storage backend");
            }
            (None, StorageBackend::Memory) => SecretCipher::new(random_key()),
        };

        let randomness_key = config
            .randomness
            .signing_key
            .as_deref()
            .map(SigningPair::from_hex)
            .transpose()
            .context("invalid randomness.signing_key")?;

        // --- storage backend

        let (storage, exec_storage): (Arc<dyn StorageProvider>, Arc<dyn ExecutorStorage>) =
            match config.storage.backend {
                StorageBackend::Memory => {
                    let backend = Arc::new(InMemoryProvider::new());
                    (backend.clone(), backend)
                }
                StorageBackend::Sqlite => {
                    let path = config
                        .storage
                        .path
                        .as_deref()
                        .context("storage.path is required for the sqlite backend")?;
                    let backend = Arc::new(
                        SqlStorage::open(path).await.context("failed to open the database")?,
                    );
                    (backend.clone(), backend)
                }
            };

        let feed_signer = match &config.feed.signing_key {
            Some(key) => {
                Arc::new(SigningPair::from_hex(key).context("invalid feed.signing_key")?)
            }
            None => Arc::new(SigningPair::generate()),
        };

        // --- executor + services

        let secrets = Arc::new(SecretVaultService::new(
            storage.clone(),
            bus.events().clone(),
            spawner.clone(),
            cipher,
        ));

        let action_registry = Arc::new(ActionRegistry::new());
        let sandbox = builder.sandbox.unwrap_or_else(|| Arc::new(NoopSandbox));
        let executor = Arc::new(FunctionExecutor::new(
            exec_storage,
            sandbox,
            secrets.clone(),
            action_registry.clone(),
            bus.events().clone(),
            ExecutorConfig {
                sandbox_timeout: Duration::from_secs(config.executor.sandbox_timeout_secs),
            },
        ));

        let accounts = Arc::new(AccountService::new(storage.clone(), bus.events().clone()));
        let functions = Arc::new(FunctionService::new(
            storage.clone(),
            secrets.clone(),
            executor.clone(),
            bus.events().clone(),
            spawner.clone(),
        ));
        let randomness = Arc::new(RandomnessService::new(randomness_key));
        let triggers =
            Arc::new(TriggerService::new(storage.clone(), bus.events().clone(), spawner.clone()));

        let automation = Arc::new(AutomationService::new(
            storage.clone(),
            executor.clone(),
            bus.events().clone(),
            spawner.clone(),
            AutomationConfig {
                tick_interval: Duration::from_millis(config.automation.tick_interval_ms),
                workers: config.automation.workers,
                ..Default::default()
            },
        ));

        let oracle_config = OracleConfig {
            poll_interval: Duration::from_millis(config.oracle.poll_interval_ms),
            workers: config.oracle.workers,
            max_attempts: config.oracle.max_attempts,
            backoff_base: Duration::from_millis(config.oracle.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.oracle.backoff_cap_ms),
            default_ttl: Duration::from_secs(config.oracle.default_ttl_secs),
            request_timeout: Duration::from_secs(config.oracle.request_timeout_secs),
            runner_token: config.oracle.runner_token.clone(),
            ..Default::default()
        };
        let transport: Arc<dyn OracleTransport> = match builder.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(oracle_config.request_timeout)
                    .context("failed to build the oracle HTTP transport")?,
            ),
        };
        let runner = match &config.oracle.runner_url {
            Some(url) => {
                let signer = match &config.oracle.signing_key {
                    Some(key) => Arc::new(
                        SigningPair::from_hex(key).context("invalid oracle.signing_key")?,
                    ),
                    None => Arc::new(SigningPair::generate()),
                };
                Some(
                    RunnerClient::new(
                        url.clone(),
                        config.oracle.runner_token.clone(),
                        signer,
                        oracle_config.request_timeout,
                    )
                    .context("failed to build the runner client")?,
                )
            }
            None => None,
        };
        let oracle = Arc::new(OracleService::new(
            storage.clone(),
            transport,
            runner,
            bus.events().clone(),
            spawner.clone(),
            oracle_config,
        ));

        let resolver = builder.resolver.unwrap_or_else(|| Arc::new(InstantResolver));
        let gasbank = Arc::new(GasBankService::new(
            storage.clone(),
            resolver,
            bus.events().clone(),
            spawner.clone(),
            GasBankConfig {
                poll_interval: Duration::from_millis(config.gasbank.poll_interval_ms),
                workers: config.gasbank.workers,
                max_attempts: config.gasbank.max_attempts,
                backoff_base: Duration::from_millis(config.gasbank.backoff_base_ms),
                backoff_cap: Duration::from_millis(config.gasbank.backoff_cap_ms),
                ..Default::default()
            },
        ));

        let fetcher = builder.fetcher.unwrap_or_else(|| Arc::new(NoQuotes));
        let feeds = Arc::new(FeedService::new(
            storage.clone(),
            fetcher,
            feed_signer,
            bus.events().clone(),
            spawner,
            FeedConfig {
                refresh_interval: Duration::from_secs(config.feed.refresh_interval_secs),
                submission_window_ppm: config.feed.submission_window_ppm,
                history_window: config.feed.history_window,
            },
        ));

        register_builtin(
            &action_registry,
            gasbank.clone(),
            automation.clone(),
            triggers.clone(),
            oracle.clone(),
            feeds.clone(),
        );

        // --- engine registry

        let mut registry = Registry::new(config.engine.engine_config());
        registry.register(Arc::new(StorageModule::new(storage.clone())));
        registry.register(Arc::new(BusModule));
        registry.register(accounts.clone());
        registry.register(secrets.clone());
        registry.register(functions.clone());
        registry.register(randomness.clone());
        registry.register(triggers.clone());
        registry.register(automation.clone());
        registry.register(oracle.clone());
        registry.register(gasbank.clone());
        registry.register(feeds.clone());

        Ok(Node {
            config,
            bus,
            registry: Arc::new(registry),
            task_manager,
            accounts,
            functions,
            secrets,
            randomness,
            triggers,
            automation,
            oracle,
            gasbank,
            feeds,
        })
    }

    /// Starts every module in dependency order.
    pub async fn launch(self) -> Result<LaunchedNode> {
        info!(target: LOG_TARGET, "Starting node.");
        self.registry.start_all().await.context("module startup failed")?;
        info!(target: LOG_TARGET, "Node started.");
        Ok(LaunchedNode { node: self })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn accounts(&self) -> &Arc<AccountService> {
        &self.accounts
    }

    pub fn functions(&self) -> &Arc<FunctionService> {
        &self.functions
    }

    pub fn secrets(&self) -> &Arc<SecretVaultService> {
        &self.secrets
    }

    pub fn randomness(&self) -> &Arc<RandomnessService> {
        &self.randomness
    }

    pub fn triggers(&self) -> &Arc<TriggerService> {
        &self.triggers
    }

    pub fn automation(&self) -> &Arc<AutomationService> {
        &self.automation
    }

    pub fn oracle(&self) -> &Arc<OracleService> {
        &self.oracle
    }

    pub fn gasbank(&self) -> &Arc<GasBankService> {
        &self.gasbank
    }

    pub fn feeds(&self) -> &Arc<FeedService> {
        &self.feeds
    }

    /// Engine status plus bus fan-out and the crate version, exported
    /// verbatim by external status transports.
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            version: env!("CARGO_PKG_VERSION"),
            engine: self.registry.status(self.bus.fanout_counters()).await,
        }
    }
}

/// A handle to the launched node.
pub struct LaunchedNode {
    node: Node,
}

impl LaunchedNode {
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Stops modules in reverse order, then drains background tasks.
    pub async fn stop(&self) -> Result<()> {
        let warnings = self.node.registry.stop_all().await;
        for warning in &warnings {
            tracing::warn!(
                target: LOG_TARGET,
                module = warning.module,
                reason = warning.reason,
                "Shutdown warning."
            );
        }
        self.node.task_manager.shutdown().await;
        info!(target: LOG_TARGET, "Node stopped.");
        Ok(())
    }

    /// Resolves when any critical background task brings the node down.
    pub async fn stopped(&self) {
        self.node.task_manager.cancelled().await
    }
}

/// Status surface document.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NodeStatus {
    pub version: &'static str,
    #[serde(flatten)]
    pub engine: StatusSnapshot,
}
