use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, ActionId, ExecutionId, FunctionId};
use crate::payload::Payload;
use crate::tenant::TenantId;

/// A user-defined scripted request handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub id: FunctionId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub name: String,
    pub source: String,
    /// Secret names the function may resolve at execution time. Validated
    /// against the secret vault on create/update.
    pub secrets: Vec<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

/// Immutable record of one function execution.
///
/// `input` is a deep copy captured before dispatch; `output` a deep copy
/// captured after. The record persists regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub function_id: FunctionId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub input: Payload,
    pub output: Option<Payload>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub actions: Vec<ActionRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    /// Queued after an earlier action failed; never dispatched.
    Skipped,
}

/// Result of one queued action within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub kind: String,
    pub params: Payload,
    pub status: ActionStatus,
    pub result: Option<Payload>,
    pub error: Option<String>,
}
