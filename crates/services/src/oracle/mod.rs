//! Oracle requests: external HTTP fetches with retry/backoff, TTL, a
//! dead-letter queue and signed runner callbacks.

mod dispatcher;
pub mod runner;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dispatcher::{DispatcherInner, DispatcherMetrics};
pub use runner::{verify_callback, CallbackError, RunnerClient, RUNNER_TOKEN_HEADER};
use strato_bus::EventBus;
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_primitives::id::{AccountId, RequestId, SourceId};
use strato_primitives::oracle::{DataSource, OracleRequest, RequestStatus};
use strato_primitives::{CallerContext, Payload, Scope};
use strato_provider::{Page, StorageProvider};
use strato_tasks::TaskSpawner;
use tokio::sync::Semaphore;
use tracing::{info, warn};
pub use transport::{FetchResponse, HttpTransport, OracleTransport, RenderedCall, TransportError};

use crate::{spawn_account_cascade, ServiceError};

pub(crate) const LOG_TARGET: &str = "oracle";

#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Interval between claim passes.
    pub poll_interval: Duration,
    /// Requests claimed per pass.
    pub batch: usize,
    /// Bound on concurrent attempts.
    pub workers: usize,
    /// Attempt budget before a request is dead-lettered.
    pub max_attempts: u32,
    /// First-retry backoff; doubles per attempt.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Request lifetime from creation.
    pub default_ttl: Duration,
    /// Deadline for one outbound fetch.
    pub request_timeout: Duration,
    /// Token attached to rendered calls and runner callbacks.
    pub runner_token: Option<String>,
    /// Claim owner id; unique per process.
    pub worker_id: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch: 32,
            workers: 8,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
            default_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            runner_token: None,
            worker_id: format!("oracle-{}", std::process::id()),
        }
    }
}

/// Fields accepted when creating a data source.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body_template: Option<String>,
}

/// Oracle command surface plus the background dispatcher.
pub struct OracleService {
    base: ServiceBase,
    inner: Arc<DispatcherInner>,
    spawner: TaskSpawner,
}

impl OracleService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        transport: Arc<dyn OracleTransport>,
        runner: Option<RunnerClient>,
        events: EventBus,
        spawner: TaskSpawner,
        config: OracleConfig,
    ) -> Self {
        let descriptor = ModuleDescriptor::new("oracle", "data", Category::Service)
            .requires("storage")
            .requires("eventBus")
            .provides("oracle");
        let inner = Arc::new(DispatcherInner {
            storage,
            transport,
            runner,
            events,
            permits: Semaphore::new(config.workers),
            config,
            metrics: DispatcherMetrics::default(),
        });
        Self { base: ServiceBase::new(descriptor), inner, spawner }
    }

    pub async fn create_source(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        spec: SourceSpec,
    ) -> Result<DataSource, ServiceError> {
        if spec.url.is_empty() || spec.name.is_empty() {
            return Err(ServiceError::Validation("source name and url are required".into()));
        }
        let method = spec.method.to_uppercase();
        if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "PATCH" | "DELETE") {
            return Err(ServiceError::Validation(format!("unsupported method {method}")));
        }

        let now = Utc::now();
        let source = DataSource {
            id: SourceId::random(),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            name: spec.name,
            url: spec.url,
            method,
            headers: spec.headers,
            body_template: spec.body_template,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.inner.storage.insert_source(source.clone()).await?;
        info!(target: LOG_TARGET, source = %source.id, name = source.name, "Data source created.");
        Ok(source)
    }

    pub async fn sources(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        page: Page,
    ) -> Result<Vec<DataSource>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.inner.storage.sources(&scope, page).await?)
    }

    pub async fn create_request(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        source_id: &SourceId,
        payload: Payload,
    ) -> Result<OracleRequest, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.inner
            .storage
            .source(&scope, source_id)
            .await?
            .ok_or(ServiceError::NotFound("data source"))?;

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.inner.config.default_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let request = OracleRequest {
            id: RequestId::random(),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            source_id: source_id.clone(),
            payload,
            status: RequestStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            ttl_expires_at: now + ttl,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        self.inner.storage.insert_request(request.clone()).await?;
        info!(target: LOG_TARGET, request = %request.id, source = %source_id, "Request queued.");
        Ok(request)
    }

    /// Cancels a still-pending request; terminal requests are left as-is.
    pub async fn cancel_request(
        &self,
        caller: &CallerContext,
        id: &RequestId,
    ) -> Result<OracleRequest, ServiceError> {
        let mut request = self
            .inner
            .storage
            .request_in_tenant(&caller.tenant, id)
            .await?
            .ok_or(ServiceError::NotFound("oracle request"))?;

        if request.status.is_terminal() {
            return Err(ServiceError::Validation(format!(
                "request is already {}",
                request.status
            )));
        }

        request.status = RequestStatus::Failed;
        request.error = Some("cancelled".to_owned());
        request.updated_at = Utc::now();
        self.inner.storage.update_request(request.clone()).await?;
        Ok(request)
    }

    pub async fn request(
        &self,
        caller: &CallerContext,
        id: &RequestId,
    ) -> Result<OracleRequest, ServiceError> {
        self.inner
            .storage
            .request_in_tenant(&caller.tenant, id)
            .await?
            .ok_or(ServiceError::NotFound("oracle request"))
    }

    pub async fn requests(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        status: Option<RequestStatus>,
        page: Page,
    ) -> Result<Vec<OracleRequest>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.inner.storage.requests(&scope, status, page).await?)
    }

}

#[async_trait]
impl Module for OracleService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        let inner = self.inner.clone();
        let spawner = self.spawner.clone();
        let token = self.base.worker_token();
        let interval = inner.config.poll_interval;

        self.spawner.build_task().name("oracle-dispatcher").spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => inner.run_cycle(Utc::now(), &spawner).await,
                }
            }
        });

        let storage = self.inner.storage.clone();
        spawn_account_cascade(
            &self.inner.events,
            &self.spawner,
            self.base.worker_token(),
            "oracle-cascade",
            move |tenant, account| {
                let storage = storage.clone();
                async move {
                    if let Err(err) = storage.delete_account_oracle_data(&tenant, &account).await {
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

    use chrono::{DateTime, Duration as ChronoDuration};
    use serde_json::json;
    use strato_bus::Bus;
    use strato_primitives::Role;
    use strato_provider::providers::InMemoryProvider;
    use strato_tasks::TaskManager;

    use super::*;

    /// Transport that replays a scripted sequence of responses.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<FetchResponse, TransportError>>>,
        calls: AtomicU32,
        seen: Mutex<Vec<RenderedCall>>,
    }

    impl ScriptedTransport {
        fn always_500() -> Self {
            Self { responses: Mutex::new(Vec::new()), calls: AtomicU32::new(0), seen: Mutex::new(Vec::new()) }
        }

        fn with(responses: Vec<Result<FetchResponse, TransportError>>) -> Self {
            Self { responses: Mutex::new(responses), calls: AtomicU32::new(0), seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl OracleTransport for ScriptedTransport {
        async fn fetch(&self, call: &RenderedCall) -> Result<FetchResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(call.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(FetchResponse { status: 500, body: "upstream busy".into() })
            } else {
                responses.remove(0)
            }
        }
    }

    fn caller() -> CallerContext {
        CallerContext::new("t", "tester", Role::User)
    }

    struct Fixture {
        service: OracleService,
        transport: Arc<ScriptedTransport>,
        account: AccountId,
    }

    async fn fixture(transport: ScriptedTransport, config: OracleConfig) -> Fixture {
        let storage = Arc::new(InMemoryProvider::new());
        let transport = Arc::new(transport);
        let bus = Bus::new();

        let service = OracleService::new(
            storage,
            transport.clone(),
            None,
            bus.events().clone(),
            TaskManager::current().task_spawner(),
            config,
        );
        Fixture { service, transport, account: AccountId::new("acct") }
    }

    async fn seed_request(fx: &Fixture) -> OracleRequest {
        let source = fx
            .service
            .create_source(
                &caller(),
                &fx.account,
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

        fx.service
            .create_request(&caller(), &fx.account, &source.id, json!({"pair": "NEO/USD"}))
            .await
            .unwrap()
    }

    fn retry_config() -> OracleConfig {
        OracleConfig {
            max_attempts: 3,
            backoff_base: std::time::Duration::from_millis(100),
            backoff_cap: std::time::Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Drives attempts synchronously by claiming + attempting at explicit
    /// clock positions.
    async fn drive_attempt(fx: &Fixture, now: DateTime<Utc>) -> Vec<OracleRequest> {
        let claimed = fx.service.inner.storage.claim_due_requests(now, 16, "test").await.unwrap();
        for request in &claimed {
            fx.service.inner.attempt(request.clone(), now).await;
        }
        claimed
    }

    #[tokio::test]
    async fn persistent_5xx_walks_the_backoff_ladder_into_the_dlq() {
        let fx = fixture(ScriptedTransport::always_500(), retry_config()).await;
        let request = seed_request(&fx).await;
        let t0 = Utc::now();

        // Attempt 1 fires immediately and reschedules 100ms out.
        assert_eq!(drive_attempt(&fx, t0).await.len(), 1);
        let after_first = fx.service.request(&caller(), &request.id).await.unwrap();
        assert_eq!(after_first.status, RequestStatus::Pending);
        assert_eq!(after_first.attempts, 1);
        assert_eq!(after_first.next_attempt_at, t0 + ChronoDuration::milliseconds(100));

        // Not due before the backoff elapses.
        assert!(drive_attempt(&fx, t0 + ChronoDuration::milliseconds(50)).await.is_empty());

        // Attempt 2 at +100ms reschedules 200ms further.
        assert_eq!(drive_attempt(&fx, t0 + ChronoDuration::milliseconds(100)).await.len(), 1);
        let after_second = fx.service.request(&caller(), &request.id).await.unwrap();
        assert_eq!(after_second.attempts, 2);
        assert_eq!(
            after_second.next_attempt_at,
            t0 + ChronoDuration::milliseconds(100) + ChronoDuration::milliseconds(200)
        );

        // Attempt 3 exhausts the budget: dead, and never claimed again.
        assert_eq!(drive_attempt(&fx, t0 + ChronoDuration::milliseconds(300)).await.len(), 1);
        let dead = fx.service.request(&caller(), &request.id).await.unwrap();
        assert_eq!(dead.status, RequestStatus::Dead);
        assert_eq!(dead.attempts, 3);

        assert!(drive_attempt(&fx, t0 + ChronoDuration::hours(1)).await.is_empty());
        assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 3);

        let dlq = fx
            .service
            .requests(&caller(), &fx.account, Some(RequestStatus::Dead), Page::default())
            .await
            .unwrap();
        assert_eq!(dlq.len(), 1);
    }

    #[tokio::test]
    async fn success_records_the_parsed_result() {
        let fx = fixture(
            ScriptedTransport::with(vec![Ok(FetchResponse {
                status: 200,
                body: r#"{"price": 1234}"#.into(),
            })]),
            retry_config(),
        )
        .await;
        let request = seed_request(&fx).await;

        drive_attempt(&fx, Utc::now()).await;

        let done = fx.service.request(&caller(), &request.id).await.unwrap();
        assert_eq!(done.status, RequestStatus::Succeeded);
        assert_eq!(done.result, Some(json!({"price": 1234})));
    }

    #[tokio::test]
    async fn non_retriable_4xx_fails_immediately() {
        let fx = fixture(
            ScriptedTransport::with(vec![Ok(FetchResponse { status: 404, body: "{}".into() })]),
            retry_config(),
        )
        .await;
        let request = seed_request(&fx).await;

        drive_attempt(&fx, Utc::now()).await;

        let failed = fx.service.request(&caller(), &request.id).await.unwrap();
        assert_eq!(failed.status, RequestStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("http 404"));
        assert_eq!(failed.attempts, 0);
    }

    #[tokio::test]
    async fn expired_ttl_wins_over_further_attempts() {
        let fx = fixture(ScriptedTransport::always_500(), retry_config()).await;
        let request = seed_request(&fx).await;

        let past_ttl = Utc::now() + ChronoDuration::hours(2);
        let claimed = fx.service.inner.storage.claim_due_requests(past_ttl, 16, "t").await.unwrap();
        fx.service.inner.attempt(claimed.into_iter().next().unwrap(), past_ttl).await;

        let expired = fx.service.request(&caller(), &request.id).await.unwrap();
        assert_eq!(expired.status, RequestStatus::Expired);
        assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_pending_request() {
        let fx = fixture(ScriptedTransport::always_500(), retry_config()).await;
        let request = seed_request(&fx).await;

        let cancelled = fx.service.cancel_request(&caller(), &request.id).await.unwrap();
        assert_eq!(cancelled.status, RequestStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some("cancelled"));

        // A cancelled request never reaches the transport.
        assert!(drive_attempt(&fx, Utc::now() + ChronoDuration::hours(1)).await.is_empty());
    }
}
