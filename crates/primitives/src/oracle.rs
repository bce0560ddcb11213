use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, RequestId, SourceId};
use crate::payload::Payload;
use crate::tenant::TenantId;

/// External HTTP endpoint an oracle request is rendered against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: SourceId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// Optional request body; `{{payload}}` interpolates the request
    /// payload as JSON.
    pub body_template: Option<String>,
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
pub enum RequestStatus {
    Pending,
    Succeeded,
    Failed,
    Expired,
    Dead,
}

impl RequestStatus {
    /// Once a request leaves `pending`, no further attempts occur.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// One oracle fetch. `next_attempt_at` gates re-entry into the work queue;
/// `ttl_expires_at` deadlines the whole request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub id: RequestId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub source_id: SourceId,
    pub payload: Payload,
    pub status: RequestStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub ttl_expires_at: DateTime<Utc>,
    pub result: Option<Payload>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
