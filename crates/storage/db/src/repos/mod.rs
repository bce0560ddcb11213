mod account;
mod automation;
mod feed;
mod function;
mod gasbank;
mod oracle;
mod secret;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strato_primitives::Scope;
use strato_provider::{ProviderError, ProviderResult};

use crate::backend_err;

/// Shared tenant gate: `Err(TenantForbidden)` when the row belongs to a
/// foreign tenant, `Ok(false)` when it belongs to a foreign account in the
/// caller's tenant, `Ok(true)` when visible.
pub(crate) fn guard_scope(row: &SqliteRow, scope: &Scope) -> ProviderResult<bool> {
    let tenant: String = row.try_get("tenant").map_err(backend_err)?;
    if tenant != scope.tenant.as_str() {
        return Err(ProviderError::TenantForbidden);
    }
    let account: String = row.try_get("account_id").map_err(backend_err)?;
    Ok(account == scope.account.as_str())
}

/// Tenant-only gate for commands that carry just an entity id.
pub(crate) fn guard_tenant(row: &SqliteRow, tenant: &strato_primitives::TenantId) -> ProviderResult<()> {
    let stored: String = row.try_get("tenant").map_err(backend_err)?;
    if stored != tenant.as_str() {
        return Err(ProviderError::TenantForbidden);
    }
    Ok(())
}

impl crate::SqlStorage {
    /// Classifies a zero-row optimistic update on a `(tenant, version)`
    /// guarded table: unknown id, foreign tenant, or version conflict.
    pub(crate) async fn versioned_miss(
        &self,
        table: &'static str,
        id: &str,
        tenant: &str,
        expected: u64,
    ) -> ProviderResult<ProviderError> {
        let row = sqlx::query(&format!("SELECT tenant, version FROM {table} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        Ok(match row {
            None => ProviderError::Backend(format!("unknown {table} row {id}")),
            Some(row) => {
                let stored_tenant: String = row.try_get("tenant").map_err(backend_err)?;
                if stored_tenant != tenant {
                    ProviderError::TenantForbidden
                } else {
                    let found: i64 = row.try_get("version").map_err(backend_err)?;
                    ProviderError::Conflict { expected, found: found as u64 }
                }
            }
        })
    }
}
