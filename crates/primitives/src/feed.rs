use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, FeedId, UpdateId};
use crate::tenant::TenantId;

/// How a set of quotes or submissions collapses into one value.
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
pub enum Aggregation {
    Median,
    Mean,
    Min,
    Max,
}

/// A price/data feed with deviation- and heartbeat-triggered publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub pair: String,
    pub decimals: u8,
    /// Maximum interval between publications regardless of deviation.
    pub heartbeat_secs: u64,
    /// Deviation trigger in parts per million of `last_value`.
    pub threshold_ppm: u32,
    pub aggregation: Aggregation,
    /// Hex-encoded Ed25519 public keys allowed to submit rounds.
    pub signer_set: Vec<String>,
    /// Distinct valid signers required to accept a submitted round.
    pub threshold: u32,
    pub last_value: Option<i64>,
    pub last_round_id: u64,
    pub last_publish_at: Option<DateTime<Utc>>,
    pub enabled: bool,
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
pub enum UpdateStatus {
    Pending,
    Accepted,
    Rejected,
}

/// One signed round submission, or an internally published round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedUpdate {
    pub id: UpdateId,
    pub feed_id: FeedId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub round_id: u64,
    pub price: i64,
    pub signer: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub status: UpdateStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
