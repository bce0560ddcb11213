//! Cron-driven automation jobs with single and check/perform dispatch.

pub mod cron;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use serde_json::json;
use strato_bus::{Envelope, EventBus};
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_executor::FunctionExecutor;
use strato_metrics::metrics::{Counter, Histogram};
use strato_metrics::Metrics;
use strato_primitives::automation::{CheckMode, Job, JobRun, RunStatus};
use strato_primitives::function::ExecutionStatus;
use strato_primitives::id::{AccountId, FunctionId, JobId};
use strato_primitives::payload::merge_objects;
use strato_primitives::{CallerContext, Payload, Role, Scope};
use strato_provider::{Page, ProviderError, StorageProvider};
use strato_tasks::TaskSpawner;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{spawn_account_cascade, topics, ServiceError};

pub(crate) const LOG_TARGET: &str = "automation";

#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Scheduler tick interval.
    pub tick_interval: Duration,
    /// Bound on concurrent job dispatches across all jobs.
    pub workers: usize,
    /// Page size for the enabled-job scan.
    pub scan_page: usize,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(1), workers: 8, scan_page: 500 }
    }
}

/// Fields a job update may change; `None` leaves the stored value.
#[derive(Debug, Default, Clone)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub check_mode: Option<CheckMode>,
    pub context: Option<Payload>,
    pub function_id: Option<FunctionId>,
}

#[derive(Metrics)]
#[metrics(scope = "automation.scheduler")]
struct SchedulerMetrics {
    /// Job dispatches started.
    dispatches: Counter,
    /// Dispatches that ended in `failed`.
    failures: Counter,
    /// Two-phase checks that declined to perform.
    skips: Counter,
    /// Two-phase dispatches that reached the perform phase.
    performs: Counter,
    /// Dispatch latency (both phases).
    duration_seconds: Histogram,
}

struct SchedulerInner {
    storage: Arc<dyn StorageProvider>,
    executor: Arc<FunctionExecutor>,
    events: EventBus,
    config: AutomationConfig,
    permits: Semaphore,
    /// Jobs with an in-flight dispatch; guarantees one dispatch per job.
    in_flight: Mutex<HashSet<JobId>>,
    /// Next fire times, derived from `now` at first sight so ticks missed
    /// across restarts are dropped, not back-filled.
    next_fires: Mutex<HashMap<JobId, (String, DateTime<Utc>)>>,
    metrics: SchedulerMetrics,
}

/// Cron scheduler plus the job command surface.
pub struct AutomationService {
    base: ServiceBase,
    inner: Arc<SchedulerInner>,
    spawner: TaskSpawner,
}

impl AutomationService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        executor: Arc<FunctionExecutor>,
        events: EventBus,
        spawner: TaskSpawner,
        config: AutomationConfig,
    ) -> Self {
        let descriptor = ModuleDescriptor::new("automation", "scheduling", Category::Service)
            .requires("storage")
            .requires("eventBus")
            .requires("functions")
            .provides("automation");
        let inner = Arc::new(SchedulerInner {
            storage,
            executor,
            events,
            permits: Semaphore::new(config.workers),
            config,
            in_flight: Mutex::new(HashSet::new()),
            next_fires: Mutex::new(HashMap::new()),
            metrics: SchedulerMetrics::default(),
        });
        Self { base: ServiceBase::new(descriptor), inner, spawner }
    }

    pub async fn create_job(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        function_id: &FunctionId,
        name: &str,
        schedule: &str,
        check_mode: CheckMode,
        context: Payload,
    ) -> Result<Job, ServiceError> {
        Schedule::parse(schedule).map_err(|err| ServiceError::InvalidSchedule(err.to_string()))?;

        self.inner
            .storage
            .function_in_tenant(&caller.tenant, function_id)
            .await?
            .ok_or(ServiceError::NotFound("function"))?;

        let now = Utc::now();
        let job = Job {
            id: JobId::random(),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            function_id: function_id.clone(),
            name: name.to_owned(),
            schedule: schedule.to_owned(),
            enabled: true,
            check_mode,
            context,
            last_fired_at: None,
            last_result: None,
            attempts: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.inner.storage.insert_job(job.clone()).await?;
        debug!(target: LOG_TARGET, job = %job.id, name, schedule, "Job created.");
        Ok(job)
    }

    pub async fn update_job(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &JobId,
        patch: JobPatch,
    ) -> Result<Job, ServiceError> {
        if let Some(schedule) = &patch.schedule {
            Schedule::parse(schedule)
                .map_err(|err| ServiceError::InvalidSchedule(err.to_string()))?;
        }

        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let mut job =
            self.inner.storage.job(&scope, id).await?.ok_or(ServiceError::NotFound("job"))?;
        let expected = job.version;

        if let Some(name) = patch.name {
            job.name = name;
        }
        if let Some(schedule) = patch.schedule {
            job.schedule = schedule;
        }
        if let Some(check_mode) = patch.check_mode {
            job.check_mode = check_mode;
        }
        if let Some(context) = patch.context {
            job.context = context;
        }
        if let Some(function_id) = patch.function_id {
            job.function_id = function_id;
        }
        job.version += 1;
        job.updated_at = Utc::now();

        self.inner.storage.update_job(job.clone(), expected).await?;
        Ok(job)
    }

    pub async fn set_enabled(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &JobId,
        enabled: bool,
    ) -> Result<Job, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let mut job =
            self.inner.storage.job(&scope, id).await?.ok_or(ServiceError::NotFound("job"))?;
        let expected = job.version;
        job.enabled = enabled;
        job.version += 1;
        job.updated_at = Utc::now();

        self.inner.storage.update_job(job.clone(), expected).await?;
        Ok(job)
    }

    pub async fn get(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &JobId,
    ) -> Result<Job, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.inner.storage.job(&scope, id).await?.ok_or(ServiceError::NotFound("job"))
    }

    pub async fn list(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        page: Page,
    ) -> Result<Vec<Job>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.inner.storage.jobs(&scope, page).await?)
    }

    pub async fn delete(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &JobId,
    ) -> Result<(), ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.inner.storage.delete_job(&scope, id).await?;
        self.inner.next_fires.lock().remove(id);
        Ok(())
    }

    /// One scheduler pass. Exposed to tests; the background loop calls it
    /// with the wall clock.
    #[cfg(test)]
    pub(crate) async fn run_tick(&self, now: DateTime<Utc>) {
        self.inner.clone().tick(now, &self.spawner).await;
    }
}

impl SchedulerInner {
    async fn tick(self: Arc<Self>, now: DateTime<Utc>, spawner: &TaskSpawner) {
        let mut offset = 0;
        loop {
            let page = Page { limit: self.config.scan_page, offset };
            let jobs = match self.storage.enabled_jobs(page).await {
                Ok(jobs) => jobs,
                Err(err) => {
                    warn!(target: LOG_TARGET, %err, "Enabled-job scan failed.");
                    return;
                }
            };
            let scanned = jobs.len();

            for job in jobs {
                if !self.due(&job, now) {
                    continue;
                }
                if !self.in_flight.lock().insert(job.id.clone()) {
                    // A previous dispatch of this job is still running.
                    continue;
                }
                // A saturated pool leaves the job for a later tick.
                let Ok(permit) = self.permits.try_acquire() else {
                    self.in_flight.lock().remove(&job.id);
                    continue;
                };
                permit.forget();

                let inner = Arc::clone(&self);
                spawner.build_task().name("automation-dispatch").spawn(async move {
                    inner.dispatch(job, now).await;
                });
            }

            if scanned < self.config.scan_page {
                break;
            }
            offset += self.config.scan_page;
        }
    }

    /// Derives due-ness from the in-memory next-fire table. Jobs are
    /// scheduled forward from the first time the scheduler sees them, so a
    /// restart never replays missed ticks.
    fn due(&self, job: &Job, now: DateTime<Utc>) -> bool {
        let mut table = self.next_fires.lock();
        match table.get(&job.id) {
            Some((schedule, at)) if schedule == &job.schedule => {
                if *at > now {
                    return false;
                }
                let next = Schedule::parse(&job.schedule)
                    .ok()
                    .and_then(|schedule| schedule.next_after(now));
                match next {
                    Some(next) => {
                        table.insert(job.id.clone(), (job.schedule.clone(), next));
                        true
                    }
                    None => {
                        table.remove(&job.id);
                        false
                    }
                }
            }
            _ => {
                // First sighting (or edited schedule): plan the next fire.
                match Schedule::parse(&job.schedule) {
                    Ok(schedule) => {
                        if let Some(next) = schedule.next_after(now) {
                            table.insert(job.id.clone(), (job.schedule.clone(), next));
                        }
                    }
                    Err(err) => {
                        warn!(target: LOG_TARGET, job = %job.id, %err, "Unparseable schedule.");
                    }
                }
                false
            }
        }
    }

    async fn dispatch(self: Arc<Self>, job: Job, fired_at: DateTime<Utc>) {
        let begun = std::time::Instant::now();
        self.metrics.dispatches.increment(1);

        let run = self.invoke(&job).await;
        let status = match &run {
            Ok(status) => *status,
            Err(_) => RunStatus::Failed,
        };
        match status {
            RunStatus::Failed => self.metrics.failures.increment(1),
            RunStatus::Skipped => self.metrics.skips.increment(1),
            RunStatus::Succeeded => {}
        }
        self.metrics.duration_seconds.record(begun.elapsed().as_secs_f64());

        let outcome = JobRun { status, error: run.err(), fired_at };
        self.record(&job, outcome).await;

        self.events.publish(
            topics::JOB_FIRED,
            Envelope::new(
                topics::JOB_FIRED,
                json!({"job_id": job.id, "status": status, "tenant": job.tenant}),
            ),
        );

        self.permits.add_permits(1);
        self.in_flight.lock().remove(&job.id);
    }

    /// Runs the job's function once (`single`) or via the check/perform
    /// protocol (`two_phase`).
    async fn invoke(&self, job: &Job) -> Result<RunStatus, String> {
        let caller = CallerContext::new(job.tenant.clone(), "automation", Role::Operator);

        match job.check_mode {
            CheckMode::Single => {
                let payload = phase_payload("single", &job.context);
                self.invoke_function(&caller, &job.function_id, payload).await?;
                Ok(RunStatus::Succeeded)
            }
            CheckMode::TwoPhase => {
                let check = phase_payload("check", &job.context);
                let output = self.invoke_function(&caller, &job.function_id, check).await?;

                if output.get("shouldPerform").and_then(|v| v.as_bool()) != Some(true) {
                    return Ok(RunStatus::Skipped);
                }
                self.metrics.performs.increment(1);

                // performPayload keys win over the check context.
                let perform_payload =
                    output.get("performPayload").cloned().unwrap_or_else(|| json!({}));
                let merged = merge_objects(&job.context, &perform_payload);
                let perform = phase_payload("perform", &merged);

                self.invoke_function(&caller, &job.function_id, perform).await?;
                Ok(RunStatus::Succeeded)
            }
        }
    }

    async fn invoke_function(
        &self,
        caller: &CallerContext,
        function_id: &FunctionId,
        payload: Payload,
    ) -> Result<Payload, String> {
        let execution = self
            .executor
            .execute(caller, function_id, payload)
            .await
            .map_err(|err| err.to_string())?;

        if execution.status == ExecutionStatus::Failed {
            return Err(execution.error.unwrap_or_else(|| "execution failed".to_owned()));
        }
        Ok(execution.output.unwrap_or_else(|| json!({})))
    }

    /// Persists the dispatch outcome. Failures bump the attempt counter
    /// but are never retried within the tick; a version conflict (user
    /// command racing the scheduler) is retried once.
    async fn record(&self, job: &Job, outcome: JobRun) {
        for attempt in 0..2 {
            let stored = match self.storage.job_in_tenant(&job.tenant, &job.id).await {
                Ok(Some(stored)) => stored,
                Ok(None) => return,
                Err(err) => {
                    warn!(target: LOG_TARGET, job = %job.id, %err, "Job reload failed.");
                    return;
                }
            };

            let expected = stored.version;
            let mut updated = stored;
            updated.last_fired_at = Some(outcome.fired_at);
            if outcome.status == RunStatus::Failed {
                updated.attempts += 1;
            }
            updated.last_result = Some(outcome.clone());
            updated.version += 1;
            updated.updated_at = Utc::now();

            match self.storage.update_job(updated, expected).await {
                Ok(()) => return,
                Err(ProviderError::Conflict { .. }) if attempt == 0 => continue,
                Err(err) => {
                    warn!(target: LOG_TARGET, job = %job.id, %err, "Recording job result failed.");
                    return;
                }
            }
        }
    }
}

/// Builds `{phase, ...context}`; the phase marker always wins.
fn phase_payload(phase: &str, context: &Payload) -> Payload {
    let mut payload = match context {
        Payload::Object(_) => context.clone(),
        _ => json!({}),
    };
    payload["phase"] = json!(phase);
    payload
}

#[async_trait]
impl Module for AutomationService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        let inner = self.inner.clone();
        let spawner = self.spawner.clone();
        let token = self.base.worker_token();
        let interval = inner.config.tick_interval;

        self.spawner.build_task().name("automation-scheduler").spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.clone().tick(Utc::now(), &spawner).await;
                    }
                }
            }
        });

        let storage = self.inner.storage.clone();
        spawn_account_cascade(
            &self.inner.events,
            &self.spawner,
            self.base.worker_token(),
            "automation-cascade",
            move |tenant, account| {
                let storage = storage.clone();
                async move {
                    if let Err(err) = storage.delete_account_jobs(&tenant, &account).await {
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
    use std::sync::Mutex as StdMutex;

    use strato_bus::Bus;
    use strato_executor::{
        ActionRegistry, ExecutorConfig, FunctionSandbox, SandboxError, SandboxOutput,
    };
    use strato_primitives::function::FunctionDef;
    use strato_primitives::secret::SecretMaterial;
    use strato_provider::providers::InMemoryProvider;
    use strato_provider::traits::function::FunctionProvider;
    use strato_tasks::TaskManager;

    use super::*;

    /// Sandbox that records each invocation payload and answers per phase.
    struct PhaseSandbox {
        invocations: Arc<StdMutex<Vec<Payload>>>,
        check_output: Payload,
    }

    #[async_trait]
    impl FunctionSandbox for PhaseSandbox {
        async fn run(
            &self,
            _def: &FunctionDef,
            input: &Payload,
            _secrets: &SecretMaterial,
        ) -> Result<SandboxOutput, SandboxError> {
            self.invocations.lock().unwrap().push(input.clone());
            match input.get("phase").and_then(|p| p.as_str()) {
                Some("check") => Ok(SandboxOutput::new(self.check_output.clone())),
                _ => Ok(SandboxOutput::new(json!({}))),
            }
        }
    }

    struct Fixture {
        service: AutomationService,
        invocations: Arc<StdMutex<Vec<Payload>>>,
        caller: CallerContext,
        account: AccountId,
        function: FunctionId,
    }

    async fn fixture(check_output: Payload) -> Fixture {
        let storage = Arc::new(InMemoryProvider::new());
        let bus = Bus::new();
        let invocations = Arc::new(StdMutex::new(Vec::new()));

        let now = Utc::now();
        let function = FunctionDef {
            id: FunctionId::random(),
            account_id: AccountId::new("acct"),
            tenant: strato_primitives::TenantId::new("t"),
            name: "target".into(),
            source: "run".into(),
            secrets: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        };
        storage.insert_function(function.clone()).await.unwrap();

        let executor = Arc::new(FunctionExecutor::new(
            storage.clone(),
            Arc::new(PhaseSandbox { invocations: invocations.clone(), check_output }),
            Arc::new(NoSecrets),
            Arc::new(ActionRegistry::new()),
            bus.events().clone(),
            ExecutorConfig::default(),
        ));

        let service = AutomationService::new(
            storage,
            executor,
            bus.events().clone(),
            TaskManager::current().task_spawner(),
            AutomationConfig::default(),
        );

        Fixture {
            service,
            invocations,
            caller: CallerContext::new("t", "tester", Role::User),
            account: AccountId::new("acct"),
            function: function.id,
        }
    }

    struct NoSecrets;

    #[async_trait]
    impl strato_executor::SecretResolver for NoSecrets {
        async fn exists(
            &self,
            _scope: &Scope,
            _name: &str,
        ) -> Result<bool, strato_executor::ResolveError> {
            Ok(false)
        }

        async fn resolve(
            &self,
            _scope: &Scope,
            _names: &[String],
        ) -> Result<SecretMaterial, strato_executor::ResolveError> {
            Ok(SecretMaterial::new())
        }
    }

    #[tokio::test]
    async fn two_phase_check_then_perform_with_merged_payload() {
        let fx =
            fixture(json!({"shouldPerform": true, "performPayload": {"foo": "bar"}})).await;

        let job = fx
            .service
            .create_job(
                &fx.caller,
                &fx.account,
                &fx.function,
                "rebalance",
                "0 * * * *",
                CheckMode::TwoPhase,
                json!({"pair": "NEO/USD", "foo": "from-context"}),
            )
            .await
            .unwrap();

        fx.service.inner.clone().dispatch(job.clone(), Utc::now()).await;

        let invocations = fx.invocations.lock().unwrap().clone();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0]["phase"], json!("check"));
        assert_eq!(invocations[0]["pair"], json!("NEO/USD"));
        assert_eq!(invocations[1]["phase"], json!("perform"));
        // performPayload wins over the check context.
        assert_eq!(invocations[1]["foo"], json!("bar"));
        assert_eq!(invocations[1]["pair"], json!("NEO/USD"));

        let stored = fx.service.get(&fx.caller, &fx.account, &job.id).await.unwrap();
        assert_eq!(stored.last_result.unwrap().status, RunStatus::Succeeded);
        assert!(stored.last_fired_at.is_some());
    }

    #[tokio::test]
    async fn two_phase_check_declining_skips_perform() {
        let fx = fixture(json!({"shouldPerform": false})).await;

        let job = fx
            .service
            .create_job(
                &fx.caller,
                &fx.account,
                &fx.function,
                "rebalance",
                "0 * * * *",
                CheckMode::TwoPhase,
                json!({}),
            )
            .await
            .unwrap();

        fx.service.inner.clone().dispatch(job.clone(), Utc::now()).await;

        assert_eq!(fx.invocations.lock().unwrap().len(), 1);
        let stored = fx.service.get(&fx.caller, &fx.account, &job.id).await.unwrap();
        assert_eq!(stored.last_result.unwrap().status, RunStatus::Skipped);
    }

    #[tokio::test]
    async fn single_mode_invokes_once() {
        let fx = fixture(json!({})).await;

        let job = fx
            .service
            .create_job(
                &fx.caller,
                &fx.account,
                &fx.function,
                "heartbeat",
                "* * * * *",
                CheckMode::Single,
                json!({"n": 1}),
            )
            .await
            .unwrap();

        fx.service.inner.clone().dispatch(job, Utc::now()).await;

        let invocations = fx.invocations.lock().unwrap().clone();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0]["phase"], json!("single"));
        assert_eq!(invocations[0]["n"], json!(1));
    }

    #[tokio::test]
    async fn first_tick_schedules_without_firing() {
        let fx = fixture(json!({})).await;

        fx.service
            .create_job(
                &fx.caller,
                &fx.account,
                &fx.function,
                "minutely",
                "* * * * *",
                CheckMode::Single,
                json!({}),
            )
            .await
            .unwrap();

        let now = Utc::now();
        fx.service.run_tick(now).await;
        assert!(fx.invocations.lock().unwrap().is_empty());

        // Two minutes later the planned fire time has passed.
        fx.service.run_tick(now + chrono::Duration::minutes(2)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.invocations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_schedule_is_rejected() {
        let fx = fixture(json!({})).await;
        let err = fx
            .service
            .create_job(
                &fx.caller,
                &fx.account,
                &fx.function,
                "bad",
                "not-cron",
                CheckMode::Single,
                json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidSchedule(_)));
    }
}
