use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strato_primitives::id::{AccountId, SecretId};
use strato_primitives::secret::Secret;
use strato_primitives::{Scope, TenantId};
use strato_provider::traits::secret::SecretProvider;
use strato_provider::{Page, ProviderResult};

use crate::codec::{from_ms, ms};
use crate::{backend_err, SqlStorage};

fn decode(row: &SqliteRow) -> ProviderResult<Secret> {
    Ok(Secret {
        id: SecretId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        name: row.try_get("name").map_err(backend_err)?,
        ciphertext: row.try_get("ciphertext").map_err(backend_err)?,
        version: row.try_get::<i64, _>("version").map_err(backend_err)? as u64,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

#[async_trait]
impl SecretProvider for SqlStorage {
    async fn put_secret(&self, secret: Secret) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO secrets
                (id, tenant, account_id, name, ciphertext, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (tenant, account_id, name) DO UPDATE
             SET ciphertext = excluded.ciphertext,
                 version = excluded.version,
                 updated_at = excluded.updated_at",
        )
        .bind(secret.id.as_str())
        .bind(secret.tenant.as_str())
        .bind(secret.account_id.as_str())
        .bind(&secret.name)
        .bind(&secret.ciphertext)
        .bind(secret.version as i64)
        .bind(ms(secret.created_at))
        .bind(ms(secret.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn secret(&self, scope: &Scope, name: &str) -> ProviderResult<Option<Secret>> {
        let row = sqlx::query(
            "SELECT * FROM secrets WHERE tenant = ?1 AND account_id = ?2 AND name = ?3",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(backend_err)?;

        row.as_ref().map(decode).transpose()
    }

    async fn secrets(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Secret>> {
        let rows = sqlx::query(
            "SELECT * FROM secrets WHERE tenant = ?1 AND account_id = ?2
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode).collect()
    }

    async fn delete_secret(&self, scope: &Scope, name: &str) -> ProviderResult<()> {
        sqlx::query("DELETE FROM secrets WHERE tenant = ?1 AND account_id = ?2 AND name = ?3")
            .bind(scope.tenant.as_str())
            .bind(scope.account.as_str())
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_account_secrets(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let result = sqlx::query("DELETE FROM secrets WHERE tenant = ?1 AND account_id = ?2")
            .bind(tenant.as_str())
            .bind(account.as_str())
            .execute(self.pool())
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}
