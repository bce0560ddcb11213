use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, FunctionId, JobId, TriggerId};
use crate::payload::Payload;
use crate::tenant::TenantId;

/// Dispatch protocol of an automation job.
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
pub enum CheckMode {
    /// One invocation per tick with `phase = "single"`.
    Single,
    /// `check` invocation first; `perform` only when the check output sets
    /// `shouldPerform = true`.
    TwoPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Two-phase check declined to perform.
    Skipped,
}

/// Outcome of the most recent dispatch of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub status: RunStatus,
    pub error: Option<String>,
    pub fired_at: DateTime<Utc>,
}

/// A cron-scheduled invocation of a function. Next-fire is derived from
/// `schedule` in UTC; missed ticks are not back-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub function_id: FunctionId,
    pub name: String,
    /// 5-field cron expression, UTC.
    pub schedule: String,
    pub enabled: bool,
    pub check_mode: CheckMode,
    /// Context merged into each dispatch payload.
    pub context: Payload,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_result: Option<JobRun>,
    pub attempts: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cross-service fan-out rule. Not scheduled itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub kind: String,
    pub rule: String,
    pub config: Payload,
    pub enabled: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
