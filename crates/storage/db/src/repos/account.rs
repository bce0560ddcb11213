use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strato_primitives::account::Account;
use strato_primitives::id::AccountId;
use strato_primitives::TenantId;
use strato_provider::traits::account::AccountProvider;
use strato_provider::{Page, ProviderError, ProviderResult};

use crate::codec::{from_json, from_ms, ms, to_json};
use crate::{backend_err, SqlStorage};

fn decode(row: &SqliteRow) -> ProviderResult<Account> {
    Ok(Account {
        id: AccountId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        owner: row.try_get("owner").map_err(backend_err)?,
        metadata: from_json(&row.try_get::<String, _>("metadata").map_err(backend_err)?)?,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

#[async_trait]
impl AccountProvider for SqlStorage {
    async fn insert_account(&self, account: Account) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO accounts (id, tenant, owner, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(account.id.as_str())
        .bind(account.tenant.as_str())
        .bind(&account.owner)
        .bind(to_json(&account.metadata)?)
        .bind(ms(account.created_at))
        .bind(ms(account.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn account(&self, tenant: &TenantId, id: &AccountId) -> ProviderResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let stored: String = row.try_get("tenant").map_err(backend_err)?;
                if stored != tenant.as_str() {
                    return Err(ProviderError::TenantForbidden);
                }
                Ok(Some(decode(&row)?))
            }
        }
    }

    async fn accounts(&self, tenant: &TenantId, page: Page) -> ProviderResult<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT * FROM accounts WHERE tenant = ?1
             ORDER BY created_at LIMIT ?2 OFFSET ?3",
        )
        .bind(tenant.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode).collect()
    }

    async fn update_account(&self, account: Account) -> ProviderResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET metadata = ?1, updated_at = ?2 WHERE id = ?3 AND tenant = ?4",
        )
        .bind(to_json(&account.metadata)?)
        .bind(ms(account.updated_at))
        .bind(account.id.as_str())
        .bind(account.tenant.as_str())
        .execute(self.pool())
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(self.account_miss(&account.tenant, &account.id).await?);
        }
        Ok(())
    }

    async fn delete_account(&self, tenant: &TenantId, id: &AccountId) -> ProviderResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?1 AND tenant = ?2")
            .bind(id.as_str())
            .bind(tenant.as_str())
            .execute(self.pool())
            .await
            .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            // Deleting an absent account is a no-op, but a foreign-tenant
            // row must still surface as forbidden.
            match self.account_miss(tenant, id).await? {
                ProviderError::TenantForbidden => return Err(ProviderError::TenantForbidden),
                _ => return Ok(()),
            }
        }
        Ok(())
    }
}

impl SqlStorage {
    /// Classifies a zero-row account write: forbidden or simply unknown.
    async fn account_miss(
        &self,
        tenant: &TenantId,
        id: &AccountId,
    ) -> ProviderResult<ProviderError> {
        let row = sqlx::query("SELECT tenant FROM accounts WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        Ok(match row {
            Some(row) => {
                let stored: String = row.try_get("tenant").map_err(backend_err)?;
                if stored != tenant.as_str() {
                    ProviderError::TenantForbidden
                } else {
                    ProviderError::Backend(format!("unknown account {id}"))
                }
            }
            None => ProviderError::Backend(format!("unknown account {id}")),
        })
    }
}
