use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::AccountId;
use crate::payload::Payload;
use crate::tenant::TenantId;

/// Root ownership handle. Every other entity references exactly one
/// account; deleting an account cascades through the owning services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tenant: TenantId,
    pub owner: String,
    pub metadata: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(tenant: TenantId, owner: impl Into<String>, metadata: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::random(),
            tenant,
            owner: owner.into(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}
