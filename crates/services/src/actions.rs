//! Built-in action handlers.
//!
//! Actions are how function executions reach other services: the sandbox
//! queues them, the executor dispatches them serially, and each handler
//! calls the target service's command surface so the service remains the
//! sole writer of its entities. Idempotency anchors: gas accounts dedup by
//! wallet, scheduled jobs by name.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use strato_executor::{ActionContext, ActionError, ActionHandler, ActionRegistry};
use strato_primitives::automation::CheckMode;
use strato_primitives::id::{FeedId, FunctionId, SourceId};
use strato_primitives::Payload;
use strato_provider::Page;

use crate::automation::AutomationService;
use crate::feed::FeedService;
use crate::gasbank::GasBankService;
use crate::oracle::OracleService;
use crate::triggers::TriggerService;

pub const GASBANK_ENSURE_ACCOUNT: &str = "gasbank.ensureAccount";
pub const AUTOMATION_SCHEDULE: &str = "automation.schedule";
pub const TRIGGER_REGISTER: &str = "trigger.register";
pub const ORACLE_CREATE_REQUEST: &str = "oracle.createRequest";
pub const PRICEFEED_PUBLISH: &str = "pricefeed.publish";

/// Registers every built-in action type. Extensions register their own
/// handlers on the same registry; anything else fails closed with
/// `action_unsupported`.
pub fn register_builtin(
    registry: &ActionRegistry,
    gasbank: Arc<GasBankService>,
    automation: Arc<AutomationService>,
    triggers: Arc<TriggerService>,
    oracle: Arc<OracleService>,
    feeds: Arc<FeedService>,
) {
    registry.register(GASBANK_ENSURE_ACCOUNT, Arc::new(EnsureGasAccount { gasbank }));
    registry.register(AUTOMATION_SCHEDULE, Arc::new(ScheduleJob { automation }));
    registry.register(TRIGGER_REGISTER, Arc::new(RegisterTrigger { triggers }));
    registry.register(ORACLE_CREATE_REQUEST, Arc::new(CreateOracleRequest { oracle }));
    registry.register(PRICEFEED_PUBLISH, Arc::new(PublishFeed { feeds }));
}

fn parse<T: for<'de> Deserialize<'de>>(params: &Payload) -> Result<T, ActionError> {
    serde_json::from_value(params.clone())
        .map_err(|err| ActionError::Failed(format!("invalid params: {err}")))
}

fn failed(err: impl std::fmt::Display) -> ActionError {
    ActionError::Failed(err.to_string())
}

#[derive(Deserialize)]
struct EnsureAccountParams {
    wallet: String,
}

struct EnsureGasAccount {
    gasbank: Arc<GasBankService>,
}

#[async_trait]
impl ActionHandler for EnsureGasAccount {
    async fn handle(&self, ctx: &ActionContext, params: &Payload) -> Result<Payload, ActionError> {
        let params: EnsureAccountParams = parse(params)?;
        let (account, balance) = self
            .gasbank
            .ensure_account(&ctx.caller, &ctx.scope.account, &params.wallet)
            .await
            .map_err(failed)?;

        Ok(json!({
            "gas_account_id": account.id,
            "wallet": account.wallet_address,
            "available": balance.available,
        }))
    }
}

#[derive(Deserialize)]
struct ScheduleParams {
    name: String,
    schedule: String,
    #[serde(default, rename = "functionId")]
    function_id: Option<FunctionId>,
    #[serde(default, rename = "checkMode")]
    check_mode: Option<CheckMode>,
    #[serde(default)]
    context: Payload,
}

struct ScheduleJob {
    automation: Arc<AutomationService>,
}

#[async_trait]
impl ActionHandler for ScheduleJob {
    async fn handle(&self, ctx: &ActionContext, params: &Payload) -> Result<Payload, ActionError> {
        let params: ScheduleParams = parse(params)?;

        // Retried executions converge on the job registered under the same
        // name.
        let existing = self
            .automation
            .list(&ctx.caller, &ctx.scope.account, Page { limit: 1_000, offset: 0 })
            .await
            .map_err(failed)?
            .into_iter()
            .find(|job| job.name == params.name);
        if let Some(job) = existing {
            return Ok(json!({"job_id": job.id, "deduplicated": true}));
        }

        // A job scheduled from inside an execution defaults to the
        // executing function.
        let function_id = params.function_id.unwrap_or_else(|| ctx.function_id.clone());
        let job = self
            .automation
            .create_job(
                &ctx.caller,
                &ctx.scope.account,
                &function_id,
                &params.name,
                &params.schedule,
                params.check_mode.unwrap_or(CheckMode::Single),
                params.context,
            )
            .await
            .map_err(failed)?;

        Ok(json!({"job_id": job.id, "enabled": job.enabled}))
    }
}

#[derive(Deserialize)]
struct RegisterTriggerParams {
    #[serde(rename = "type")]
    kind: String,
    rule: String,
    #[serde(default)]
    config: Payload,
}

struct RegisterTrigger {
    triggers: Arc<TriggerService>,
}

#[async_trait]
impl ActionHandler for RegisterTrigger {
    async fn handle(&self, ctx: &ActionContext, params: &Payload) -> Result<Payload, ActionError> {
        let params: RegisterTriggerParams = parse(params)?;
        let trigger = self
            .triggers
            .register(&ctx.caller, &ctx.scope.account, &params.kind, &params.rule, params.config)
            .await
            .map_err(failed)?;

        Ok(json!({"trigger_id": trigger.id, "enabled": trigger.enabled}))
    }
}

#[derive(Deserialize)]
struct CreateOracleRequestParams {
    #[serde(rename = "dataSourceId")]
    data_source_id: SourceId,
    #[serde(default)]
    payload: Payload,
}

struct CreateOracleRequest {
    oracle: Arc<OracleService>,
}

#[async_trait]
impl ActionHandler for CreateOracleRequest {
    async fn handle(&self, ctx: &ActionContext, params: &Payload) -> Result<Payload, ActionError> {
        let params: CreateOracleRequestParams = parse(params)?;
        let request = self
            .oracle
            .create_request(&ctx.caller, &ctx.scope.account, &params.data_source_id, params.payload)
            .await
            .map_err(failed)?;

        Ok(json!({"request_id": request.id, "status": request.status}))
    }
}

#[derive(Deserialize)]
struct PublishFeedParams {
    #[serde(rename = "feedId")]
    feed_id: FeedId,
    price: i64,
}

struct PublishFeed {
    feeds: Arc<FeedService>,
}

#[async_trait]
impl ActionHandler for PublishFeed {
    async fn handle(&self, ctx: &ActionContext, params: &Payload) -> Result<Payload, ActionError> {
        let params: PublishFeedParams = parse(params)?;
        let update = self
            .feeds
            .publish_value(&ctx.caller, &ctx.scope.account, &params.feed_id, params.price)
            .await
            .map_err(failed)?;

        Ok(json!({"update_id": update.id, "round_id": update.round_id}))
    }
}
