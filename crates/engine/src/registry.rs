use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use strato_bus::BusFanoutCounters;
use tracing::{error, info, warn};

use crate::module::{Lifecycle, Module, ModuleDescriptor};
use crate::status::{ModuleStatus, StatusSnapshot};
use crate::LOG_TARGET;

/// Index into the registry's module arena. Modules reference each other by
/// id, never by pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(usize);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for a single module start.
    pub start_deadline: Duration,
    /// Deadline for a single module stop; exceeding it is a warning, not a
    /// failure.
    pub stop_deadline: Duration,
    /// A module still not ready past this threshold is surfaced as slow.
    pub slow_threshold: Duration,
    /// Interval between readiness polls after start.
    pub readiness_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_deadline: Duration::from_secs(30),
            stop_deadline: Duration::from_secs(10),
            slow_threshold: Duration::from_secs(2),
            readiness_poll: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("module `{module}` requires capability `{capability}` but no module provides it")]
    MissingCapability { module: &'static str, capability: &'static str },

    #[error("dependency cycle through modules: {0:?}")]
    DependencyCycle(Vec<&'static str>),

    #[error("start failed for {}: {}", failures.iter().map(|f| f.0).collect::<Vec<_>>().join(", "),
            failures.iter().map(|f| f.1.as_str()).collect::<Vec<_>>().join("; "))]
    StartFailed { failures: Vec<(&'static str, String)> },
}

/// Module that exceeded its stop deadline during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopWarning {
    pub module: &'static str,
    pub reason: &'static str,
}

struct ModuleEntry {
    module: Arc<dyn Module>,
    descriptor: ModuleDescriptor,
    lifecycle: RwLock<Lifecycle>,
    start_seconds: RwLock<Option<f64>>,
    stop_seconds: RwLock<Option<f64>>,
    started_at: RwLock<Option<Instant>>,
}

/// Arena of modules plus dependency edges `(consumer, provider)`.
pub struct Registry {
    modules: Vec<ModuleEntry>,
    explicit_edges: RwLock<Vec<(ModuleId, ModuleId)>>,
    start_order: RwLock<Option<Vec<ModuleId>>>,
    config: EngineConfig,
}

impl Registry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            modules: Vec::new(),
            explicit_edges: RwLock::new(Vec::new()),
            start_order: RwLock::new(None),
            config,
        }
    }

    pub fn register(&mut self, module: Arc<dyn Module>) -> ModuleId {
        let descriptor = module.descriptor();
        info!(target: LOG_TARGET, module = descriptor.name, "Module registered.");
        self.modules.push(ModuleEntry {
            module,
            descriptor,
            lifecycle: RwLock::new(Lifecycle::Registered),
            start_seconds: RwLock::new(None),
            stop_seconds: RwLock::new(None),
            started_at: RwLock::new(None),
        });
        ModuleId(self.modules.len() - 1)
    }

    /// Declares an explicit dependency edge, unioned with the auto-wired
    /// capability edges.
    pub fn add_edge(&self, consumer: ModuleId, provider: ModuleId) {
        self.explicit_edges.write().push((consumer, provider));
    }

    /// Builds the dependency edge set and returns a topological start
    /// order. Validated for acyclicity; every required capability must
    /// have a provider.
    fn wire(&self) -> Result<Vec<ModuleId>, EngineError> {
        let mut providers: HashMap<&'static str, Vec<usize>> = HashMap::new();
        for (index, entry) in self.modules.iter().enumerate() {
            for &capability in &entry.descriptor.provides {
                providers.entry(capability).or_default().push(index);
            }
        }

        // consumer -> providers it depends on
        let mut edges: HashSet<(usize, usize)> = HashSet::new();
        for (index, entry) in self.modules.iter().enumerate() {
            for &capability in &entry.descriptor.requires {
                let Some(sources) = providers.get(capability) else {
                    return Err(EngineError::MissingCapability {
                        module: entry.descriptor.name,
                        capability,
                    });
                };
                for &provider in sources {
                    if provider != index {
                        edges.insert((index, provider));
                    }
                }
            }
        }
        for (consumer, provider) in self.explicit_edges.read().iter() {
            if consumer.0 != provider.0 {
                edges.insert((consumer.0, provider.0));
            }
        }

        // Kahn's algorithm: providers start before their consumers.
        let mut in_degree = vec![0usize; self.modules.len()];
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        for &(consumer, provider) in &edges {
            in_degree[consumer] += 1;
            dependents.entry(provider).or_default().push(consumer);
        }

        let mut queue: VecDeque<usize> =
            (0..self.modules.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.modules.len());
        while let Some(index) = queue.pop_front() {
            order.push(ModuleId(index));
            for &dependent in dependents.get(&index).map(Vec::as_slice).unwrap_or(&[]) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != self.modules.len() {
            let cycle = (0..self.modules.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.modules[i].descriptor.name)
                .collect();
            return Err(EngineError::DependencyCycle(cycle));
        }
        Ok(order)
    }

    /// Starts every module in topological order. A failed start marks the
    /// module `Failed`, skips its transitive dependents, and contributes to
    /// the aggregate error; independent modules still start.
    pub async fn start_all(&self) -> Result<(), EngineError> {
        let order = self.wire()?;
        *self.start_order.write() = Some(order.clone());

        let dependents = self.dependent_closure(&order);
        let mut skipped: HashSet<usize> = HashSet::new();
        let mut failures: Vec<(&'static str, String)> = Vec::new();

        for id in &order {
            let entry = &self.modules[id.0];
            let name = entry.descriptor.name;

            if skipped.contains(&id.0) {
                warn!(target: LOG_TARGET, module = name, "Skipped: a dependency failed to start.");
                continue;
            }

            *entry.lifecycle.write() = Lifecycle::Starting;
            let begun = Instant::now();

            let result =
                tokio::time::timeout(self.config.start_deadline, entry.module.start()).await;
            let elapsed = begun.elapsed();

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(_) => Some(format!("start exceeded {:?}", self.config.start_deadline)),
            };

            if let Some(reason) = failure {
                error!(target: LOG_TARGET, module = name, %reason, "Module failed to start.");
                *entry.lifecycle.write() = Lifecycle::Failed;
                failures.push((name, reason));
                if let Some(downstream) = dependents.get(&id.0) {
                    skipped.extend(downstream.iter().copied());
                }
                continue;
            }

            *entry.start_seconds.write() = Some(elapsed.as_secs_f64());
            *entry.started_at.write() = Some(begun);
            *entry.lifecycle.write() = Lifecycle::Started;

            self.await_readiness(id.0).await;
            info!(
                target: LOG_TARGET,
                module = name,
                start_seconds = elapsed.as_secs_f64(),
                "Module started."
            );
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::StartFailed { failures })
        }
    }

    /// Polls readiness until the module reports ready or the slow-module
    /// threshold passes. A slow module is surfaced as `NotReady`, never
    /// failed.
    async fn await_readiness(&self, index: usize) {
        let entry = &self.modules[index];
        let deadline = Instant::now() + self.config.slow_threshold;

        loop {
            if entry.module.ready().await {
                *entry.lifecycle.write() = Lifecycle::Ready;
                return;
            }
            if Instant::now() >= deadline {
                warn!(
                    target: LOG_TARGET,
                    module = entry.descriptor.name,
                    threshold = ?self.config.slow_threshold,
                    "Module not ready within the slow-module threshold."
                );
                *entry.lifecycle.write() = Lifecycle::NotReady;
                return;
            }
            tokio::time::sleep(self.config.readiness_poll).await;
        }
    }

    /// Stops modules in reverse start order. A stop exceeding its deadline
    /// is recorded as a warning and shutdown moves on.
    pub async fn stop_all(&self) -> Vec<StopWarning> {
        let order = self.start_order.read().clone().unwrap_or_default();
        let mut warnings = Vec::new();

        for id in order.iter().rev() {
            let entry = &self.modules[id.0];
            let name = entry.descriptor.name;

            let lifecycle = *entry.lifecycle.read();
            if !matches!(lifecycle, Lifecycle::Started | Lifecycle::Ready | Lifecycle::NotReady) {
                continue;
            }

            *entry.lifecycle.write() = Lifecycle::Stopping;
            let begun = Instant::now();

            match tokio::time::timeout(self.config.stop_deadline, entry.module.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(target: LOG_TARGET, module = name, %err, "Module stop returned an error.");
                }
                Err(_) => {
                    warn!(target: LOG_TARGET, module = name, "Module stop exceeded its deadline.");
                    warnings.push(StopWarning { module: name, reason: "stop_timeout" });
                }
            }

            *entry.stop_seconds.write() = Some(begun.elapsed().as_secs_f64());
            *entry.lifecycle.write() = Lifecycle::Stopped;
            info!(target: LOG_TARGET, module = name, "Module stopped.");
        }
        warnings
    }

    /// Live status snapshot. Readiness is re-polled for running modules so
    /// flapping modules report truthfully.
    pub async fn status(&self, bus_fanout: BusFanoutCounters) -> StatusSnapshot {
        let mut modules = Vec::with_capacity(self.modules.len());

        for entry in &self.modules {
            let lifecycle = *entry.lifecycle.read();
            let ready = match lifecycle {
                Lifecycle::Started | Lifecycle::Ready | Lifecycle::NotReady => {
                    let ready = entry.module.ready().await;
                    *entry.lifecycle.write() =
                        if ready { Lifecycle::Ready } else { Lifecycle::NotReady };
                    ready
                }
                _ => false,
            };

            modules.push(ModuleStatus {
                name: entry.descriptor.name.to_owned(),
                domain: entry.descriptor.domain.to_owned(),
                category: entry.descriptor.category,
                lifecycle: *entry.lifecycle.read(),
                ready,
                start_seconds: *entry.start_seconds.read(),
                stop_seconds: *entry.stop_seconds.read(),
                uptime_seconds: entry.started_at.read().map(|at| at.elapsed().as_secs_f64()),
                provides: entry.descriptor.provides.iter().map(|c| c.to_string()).collect(),
                requires: entry.descriptor.requires.iter().map(|c| c.to_string()).collect(),
            });
        }

        StatusSnapshot {
            modules,
            slow_threshold_ms: self.config.slow_threshold.as_millis() as u64,
            bus_fanout,
        }
    }

    /// Transitive consumers of each module, used to skip dependents of a
    /// failed start.
    fn dependent_closure(&self, order: &[ModuleId]) -> HashMap<usize, HashSet<usize>> {
        let mut direct: HashMap<usize, HashSet<usize>> = HashMap::new();

        let mut providers: HashMap<&'static str, Vec<usize>> = HashMap::new();
        for (index, entry) in self.modules.iter().enumerate() {
            for &capability in &entry.descriptor.provides {
                providers.entry(capability).or_default().push(index);
            }
        }
        for (index, entry) in self.modules.iter().enumerate() {
            for &capability in &entry.descriptor.requires {
                for &provider in providers.get(capability).map(Vec::as_slice).unwrap_or(&[]) {
                    if provider != index {
                        direct.entry(provider).or_default().insert(index);
                    }
                }
            }
        }
        for (consumer, provider) in self.explicit_edges.read().iter() {
            if consumer.0 != provider.0 {
                direct.entry(provider.0).or_default().insert(consumer.0);
            }
        }

        // Propagate in reverse topological order so closures are complete.
        let mut closure: HashMap<usize, HashSet<usize>> = HashMap::new();
        for id in order.iter().rev() {
            let mut all = direct.get(&id.0).cloned().unwrap_or_default();
            for dependent in direct.get(&id.0).cloned().unwrap_or_default() {
                if let Some(transitive) = closure.get(&dependent) {
                    all.extend(transitive.iter().copied());
                }
            }
            closure.insert(id.0, all);
        }
        closure
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::module::{Category, ModuleDescriptor, ModuleError};

    #[derive(Default)]
    struct StartLog(Mutex<Vec<&'static str>>);

    struct TestModule {
        descriptor: ModuleDescriptor,
        log: Arc<StartLog>,
        fail_start: bool,
        ready: Arc<AtomicBool>,
        slow_stop: bool,
    }

    impl TestModule {
        fn new(descriptor: ModuleDescriptor, log: Arc<StartLog>) -> Self {
            Self {
                descriptor,
                log,
                fail_start: false,
                ready: Arc::new(AtomicBool::new(true)),
                slow_stop: false,
            }
        }
    }

    #[async_trait]
    impl Module for TestModule {
        fn descriptor(&self) -> ModuleDescriptor {
            self.descriptor.clone()
        }

        async fn start(&self) -> Result<(), ModuleError> {
            if self.fail_start {
                return Err("boom".into());
            }
            self.log.0.lock().unwrap().push(self.descriptor.name);
            Ok(())
        }

        async fn ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn stop(&self) -> Result<(), ModuleError> {
            if self.slow_stop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(())
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            start_deadline: Duration::from_secs(1),
            stop_deadline: Duration::from_millis(50),
            slow_threshold: Duration::from_millis(100),
            readiness_poll: Duration::from_millis(10),
        }
    }

    fn descriptor(name: &'static str) -> ModuleDescriptor {
        ModuleDescriptor::new(name, "test", Category::Service)
    }

    #[tokio::test]
    async fn start_order_follows_capabilities() {
        let log = Arc::new(StartLog::default());
        let mut registry = Registry::new(config());

        registry.register(Arc::new(TestModule::new(
            descriptor("consumer").requires("storage"),
            log.clone(),
        )));
        registry.register(Arc::new(TestModule::new(
            descriptor("store").provides("storage"),
            log.clone(),
        )));

        registry.start_all().await.unwrap();
        assert_eq!(*log.0.lock().unwrap(), vec!["store", "consumer"]);
    }

    #[tokio::test]
    async fn missing_capability_is_rejected() {
        let log = Arc::new(StartLog::default());
        let mut registry = Registry::new(config());
        registry.register(Arc::new(TestModule::new(
            descriptor("consumer").requires("storage"),
            log,
        )));

        let err = registry.start_all().await.unwrap_err();
        assert!(matches!(err, EngineError::MissingCapability { capability: "storage", .. }));
    }

    #[tokio::test]
    async fn cycles_are_detected() {
        let log = Arc::new(StartLog::default());
        let mut registry = Registry::new(config());
        registry.register(Arc::new(TestModule::new(
            descriptor("a").requires("b-cap").provides("a-cap"),
            log.clone(),
        )));
        registry.register(Arc::new(TestModule::new(
            descriptor("b").requires("a-cap").provides("b-cap"),
            log,
        )));

        let err = registry.start_all().await.unwrap_err();
        assert!(matches!(err, EngineError::DependencyCycle(_)));
    }

    #[tokio::test]
    async fn failed_start_skips_dependents_but_not_independents() {
        let log = Arc::new(StartLog::default());
        let mut registry = Registry::new(config());

        let mut failing = TestModule::new(descriptor("store").provides("storage"), log.clone());
        failing.fail_start = true;
        registry.register(Arc::new(failing));
        registry.register(Arc::new(TestModule::new(
            descriptor("dependent").requires("storage"),
            log.clone(),
        )));
        registry.register(Arc::new(TestModule::new(descriptor("independent"), log.clone())));

        let err = registry.start_all().await.unwrap_err();
        let EngineError::StartFailed { failures } = err else { panic!("expected StartFailed") };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "store");

        // The dependent never started; the unrelated module did.
        assert_eq!(*log.0.lock().unwrap(), vec!["independent"]);
    }

    #[tokio::test]
    async fn slow_readiness_is_surfaced_not_failed() {
        let log = Arc::new(StartLog::default());
        let mut registry = Registry::new(config());

        let module = TestModule::new(descriptor("flappy"), log);
        module.ready.store(false, Ordering::SeqCst);
        let ready_flag = module.ready.clone();
        registry.register(Arc::new(module));

        registry.start_all().await.unwrap();
        let status = registry.status(BusFanoutCounters::default()).await;
        assert_eq!(status.modules[0].lifecycle, Lifecycle::NotReady);

        // Readiness flaps back; the next snapshot reflects it.
        ready_flag.store(true, Ordering::SeqCst);
        let status = registry.status(BusFanoutCounters::default()).await;
        assert_eq!(status.modules[0].lifecycle, Lifecycle::Ready);
        assert!(status.modules[0].ready);
    }

    #[tokio::test]
    async fn stop_deadline_overrun_is_a_warning() {
        let log = Arc::new(StartLog::default());
        let mut registry = Registry::new(config());

        let mut module = TestModule::new(descriptor("sluggish"), log);
        module.slow_stop = true;
        registry.register(Arc::new(module));

        registry.start_all().await.unwrap();
        let warnings = registry.stop_all().await;
        assert_eq!(warnings, vec![StopWarning { module: "sluggish", reason: "stop_timeout" }]);
    }
}
