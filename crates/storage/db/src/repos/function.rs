use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strato_primitives::function::{Execution, FunctionDef};
use strato_primitives::id::{AccountId, ExecutionId, FunctionId};
use strato_primitives::{Scope, TenantId};
use strato_provider::traits::function::{ExecutionProvider, FunctionProvider};
use strato_provider::{Page, ProviderError, ProviderResult};

use crate::codec::{from_json, from_ms, ms, parse_enum, to_json};
use crate::repos::{guard_scope, guard_tenant};
use crate::{backend_err, SqlStorage};

fn decode_function(row: &SqliteRow) -> ProviderResult<FunctionDef> {
    Ok(FunctionDef {
        id: FunctionId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        name: row.try_get("name").map_err(backend_err)?,
        source: row.try_get("source").map_err(backend_err)?,
        secrets: from_json(&row.try_get::<String, _>("secrets").map_err(backend_err)?)?,
        version: row.try_get::<i64, _>("version").map_err(backend_err)? as u64,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

fn decode_execution(row: &SqliteRow) -> ProviderResult<Execution> {
    let output: Option<String> = row.try_get("output").map_err(backend_err)?;
    Ok(Execution {
        id: ExecutionId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        function_id: FunctionId::new(row.try_get::<String, _>("function_id").map_err(backend_err)?),
        input: from_json(&row.try_get::<String, _>("input").map_err(backend_err)?)?,
        output: output.as_deref().map(from_json).transpose()?,
        status: parse_enum(
            &row.try_get::<String, _>("status").map_err(backend_err)?,
            "execution status",
        )?,
        error: row.try_get("error").map_err(backend_err)?,
        actions: from_json(&row.try_get::<String, _>("actions").map_err(backend_err)?)?,
        started_at: from_ms(row.try_get("started_at").map_err(backend_err)?)?,
        completed_at: from_ms(row.try_get("completed_at").map_err(backend_err)?)?,
    })
}

#[async_trait]
impl FunctionProvider for SqlStorage {
    async fn insert_function(&self, function: FunctionDef) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO functions
                (id, tenant, account_id, name, source, secrets, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(function.id.as_str())
        .bind(function.tenant.as_str())
        .bind(function.account_id.as_str())
        .bind(&function.name)
        .bind(&function.source)
        .bind(to_json(&function.secrets)?)
        .bind(function.version as i64)
        .bind(ms(function.created_at))
        .bind(ms(function.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn function(
        &self,
        scope: &Scope,
        id: &FunctionId,
    ) -> ProviderResult<Option<FunctionDef>> {
        let row = sqlx::query("SELECT * FROM functions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_function(&row)?)),
        }
    }

    async fn function_in_tenant(
        &self,
        tenant: &TenantId,
        id: &FunctionId,
    ) -> ProviderResult<Option<FunctionDef>> {
        let row = sqlx::query("SELECT * FROM functions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                guard_tenant(&row, tenant)?;
                Ok(Some(decode_function(&row)?))
            }
        }
    }

    async fn functions(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<FunctionDef>> {
        let rows = sqlx::query(
            "SELECT * FROM functions WHERE tenant = ?1 AND account_id = ?2
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_function).collect()
    }

    async fn update_function(
        &self,
        function: FunctionDef,
        expected_version: u64,
    ) -> ProviderResult<()> {
        let result = sqlx::query(
            "UPDATE functions
             SET name = ?1, source = ?2, secrets = ?3, version = ?4, updated_at = ?5
             WHERE id = ?6 AND tenant = ?7 AND version = ?8",
        )
        .bind(&function.name)
        .bind(&function.source)
        .bind(to_json(&function.secrets)?)
        .bind(function.version as i64)
        .bind(ms(function.updated_at))
        .bind(function.id.as_str())
        .bind(function.tenant.as_str())
        .bind(expected_version as i64)
        .execute(self.pool())
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(self
                .versioned_miss(
                    "functions",
                    function.id.as_str(),
                    function.tenant.as_str(),
                    expected_version,
                )
                .await?);
        }
        Ok(())
    }

    async fn delete_function(&self, scope: &Scope, id: &FunctionId) -> ProviderResult<()> {
        let row = sqlx::query("SELECT tenant, account_id FROM functions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(()),
            Some(row) if !guard_scope(&row, scope)? => Ok(()),
            Some(_) => {
                sqlx::query("DELETE FROM functions WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(self.pool())
                    .await
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    async fn delete_account_functions(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let result =
            sqlx::query("DELETE FROM functions WHERE tenant = ?1 AND account_id = ?2")
                .bind(tenant.as_str())
                .bind(account.as_str())
                .execute(self.pool())
                .await
                .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ExecutionProvider for SqlStorage {
    async fn insert_execution(&self, execution: Execution) -> ProviderResult<()> {
        let result = sqlx::query(
            "INSERT INTO executions
                (id, tenant, account_id, function_id, input, output, status, error, actions,
                 started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(execution.id.as_str())
        .bind(execution.tenant.as_str())
        .bind(execution.account_id.as_str())
        .bind(execution.function_id.as_str())
        .bind(to_json(&execution.input)?)
        .bind(execution.output.as_ref().map(to_json).transpose()?)
        .bind(execution.status.to_string())
        .bind(&execution.error)
        .bind(to_json(&execution.actions)?)
        .bind(ms(execution.started_at))
        .bind(ms(execution.completed_at))
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            // Re-inserting an id is the only way to "mutate" this table.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ProviderError::Immutable("execution"))
            }
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn execution(
        &self,
        scope: &Scope,
        id: &ExecutionId,
    ) -> ProviderResult<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_execution(&row)?)),
        }
    }

    async fn executions(
        &self,
        scope: &Scope,
        function: Option<&FunctionId>,
        page: Page,
    ) -> ProviderResult<Vec<Execution>> {
        let rows = match function {
            Some(function) => {
                sqlx::query(
                    "SELECT * FROM executions
                     WHERE tenant = ?1 AND account_id = ?2 AND function_id = ?3
                     ORDER BY started_at LIMIT ?4 OFFSET ?5",
                )
                .bind(scope.tenant.as_str())
                .bind(scope.account.as_str())
                .bind(function.as_str())
                .bind(page.limit as i64)
                .bind(page.offset as i64)
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM executions WHERE tenant = ?1 AND account_id = ?2
                     ORDER BY started_at LIMIT ?3 OFFSET ?4",
                )
                .bind(scope.tenant.as_str())
                .bind(scope.account.as_str())
                .bind(page.limit as i64)
                .bind(page.offset as i64)
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(backend_err)?;

        rows.iter().map(decode_execution).collect()
    }

    async fn delete_account_executions(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let result =
            sqlx::query("DELETE FROM executions WHERE tenant = ?1 AND account_id = ?2")
                .bind(tenant.as_str())
                .bind(account.as_str())
                .execute(self.pool())
                .await
                .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}
