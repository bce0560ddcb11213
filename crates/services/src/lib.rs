//! The service modules: accounts, functions, secrets, randomness,
//! triggers, automation, oracle, gas bank and feeds.
//!
//! Each service owns its repositories exclusively and is registered with
//! the engine as a module. Cross-service effects travel as queued actions
//! or bus events; the account-deletion cascade is bus-driven, with every
//! owning service deleting its own rows.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod accounts;
pub mod actions;
pub mod automation;
pub mod error;
pub mod feed;
pub mod functions;
pub mod gasbank;
pub mod oracle;
pub mod randomness;
pub mod secrets;
pub mod triggers;

use std::future::Future;

pub use error::ServiceError;
use serde_json::Value;
use strato_bus::EventBus;
use strato_primitives::id::AccountId;
use strato_primitives::TenantId;
use strato_tasks::TaskSpawner;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Bus topics shared across services.
pub mod topics {
    /// Account removed; owning services delete their rows.
    pub const ACCOUNT_DELETED: &str = "account.deleted";
    /// Emitted by the executor after every persisted execution.
    pub const FUNCTION_EXECUTED: &str = "function.executed";
    /// Oracle request fetched successfully.
    pub const ORACLE_SUCCEEDED: &str = "oracle.request.succeeded";
    /// Oracle request exhausted its retry budget.
    pub const ORACLE_DLQ: &str = "oracle.dlq";
    /// Chain indexer confirmed an on-chain deposit.
    pub const CHAIN_DEPOSIT: &str = "chain.deposit.confirmed";
    /// Withdrawal settled by the resolver.
    pub const GAS_SETTLED: &str = "gasbank.withdrawal.settled";
    /// Withdrawal exhausted its retry budget.
    pub const GAS_DLQ: &str = "gasbank.dlq";
    /// A feed advanced to a new round.
    pub const FEED_PUBLISHED: &str = "feed.round.published";
    /// An automation job dispatched.
    pub const JOB_FIRED: &str = "automation.job.fired";
}

/// Spawns the account-deletion cascade loop for one service: every
/// `account.deleted` event triggers `cleanup` against the service's own
/// repositories.
pub(crate) fn spawn_account_cascade<F, Fut>(
    events: &EventBus,
    spawner: &TaskSpawner,
    token: CancellationToken,
    task: &'static str,
    cleanup: F,
) where
    F: Fn(TenantId, AccountId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut stream = events.subscribe(topics::ACCOUNT_DELETED);

    spawner.build_task().name(task).spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = stream.recv() => {
                    let Some(envelope) = event else { break };
                    let Some((tenant, account)) = cascade_target(&envelope.payload) else {
                        warn!(target: "services", task, "Malformed account.deleted payload.");
                        continue;
                    };
                    cleanup(tenant, account).await;
                }
            }
        }
    });
}

fn cascade_target(payload: &Value) -> Option<(TenantId, AccountId)> {
    let tenant = payload.get("tenant")?.as_str()?;
    let account = payload.get("account_id")?.as_str()?;
    Some((TenantId::new(tenant), AccountId::new(account)))
}
