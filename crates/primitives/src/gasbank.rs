use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, GasAccountId, GasTxId};
use crate::tenant::TenantId;

/// Prepaid balance holder bound to a wallet address. Balances are never
/// stored on the account; they are derived from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasAccount {
    pub id: GasAccountId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger-derived view of a gas account.
///
/// `available = Σ settled deposits − Σ settled withdrawals − Σ active
/// reservations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub available: i64,
    pub pending_withdrawals: i64,
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
pub enum GasTxKind {
    Deposit,
    Withdraw,
    Reserve,
    Release,
    Fee,
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
pub enum GasTxStatus {
    Pending,
    Settled,
    Failed,
    Dead,
}

/// Append-only ledger entry. Amounts are integer base units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasTransaction {
    pub id: GasTxId,
    pub gas_account_id: GasAccountId,
    pub account_id: AccountId,
    pub tenant: TenantId,
    pub kind: GasTxKind,
    pub amount: i64,
    pub status: GasTxStatus,
    pub attempts: u32,
    pub reference: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}
