use serde::{Deserialize, Serialize};

use crate::id::AccountId;

/// Isolation boundary above accounts. Every data access filters by tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    User,
}

/// Identity attached to every command entering the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub tenant: TenantId,
    pub principal: String,
    pub role: Role,
}

impl CallerContext {
    pub fn new(tenant: impl Into<TenantId>, principal: impl Into<String>, role: Role) -> Self {
        Self { tenant: tenant.into(), principal: principal.into(), role }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

/// `(tenant, account)` pair that scopes reads and writes on behalf of a
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant: TenantId,
    pub account: AccountId,
}

impl Scope {
    pub fn new(tenant: TenantId, account: AccountId) -> Self {
        Self { tenant, account }
    }
}
