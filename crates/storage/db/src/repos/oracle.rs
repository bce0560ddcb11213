use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strato_primitives::id::{AccountId, RequestId, SourceId};
use strato_primitives::oracle::{DataSource, OracleRequest, RequestStatus};
use strato_primitives::{Scope, TenantId};
use strato_provider::traits::oracle::OracleProvider;
use strato_provider::{Page, ProviderError, ProviderResult};

use crate::codec::{from_json, from_ms, ms, parse_enum, to_json};
use crate::repos::{guard_scope, guard_tenant};
use crate::{backend_err, SqlStorage, CLAIM_LEASE_SECS};

fn decode_source(row: &SqliteRow) -> ProviderResult<DataSource> {
    Ok(DataSource {
        id: SourceId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        name: row.try_get("name").map_err(backend_err)?,
        url: row.try_get("url").map_err(backend_err)?,
        method: row.try_get("method").map_err(backend_err)?,
        headers: from_json(&row.try_get::<String, _>("headers").map_err(backend_err)?)?,
        body_template: row.try_get("body_template").map_err(backend_err)?,
        version: row.try_get::<i64, _>("version").map_err(backend_err)? as u64,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

fn decode_request(row: &SqliteRow) -> ProviderResult<OracleRequest> {
    let result: Option<String> = row.try_get("result").map_err(backend_err)?;
    Ok(OracleRequest {
        id: RequestId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        source_id: SourceId::new(row.try_get::<String, _>("source_id").map_err(backend_err)?),
        payload: from_json(&row.try_get::<String, _>("payload").map_err(backend_err)?)?,
        status: parse_enum(
            &row.try_get::<String, _>("status").map_err(backend_err)?,
            "request status",
        )?,
        attempts: row.try_get::<i64, _>("attempts").map_err(backend_err)? as u32,
        next_attempt_at: from_ms(row.try_get("next_attempt_at").map_err(backend_err)?)?,
        ttl_expires_at: from_ms(row.try_get("ttl_expires_at").map_err(backend_err)?)?,
        result: result.as_deref().map(from_json).transpose()?,
        error: row.try_get("error").map_err(backend_err)?,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

#[async_trait]
impl OracleProvider for SqlStorage {
    async fn insert_source(&self, source: DataSource) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO oracle_sources
                (id, tenant, account_id, name, url, method, headers, body_template, version,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(source.id.as_str())
        .bind(source.tenant.as_str())
        .bind(source.account_id.as_str())
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.method)
        .bind(to_json(&source.headers)?)
        .bind(&source.body_template)
        .bind(source.version as i64)
        .bind(ms(source.created_at))
        .bind(ms(source.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn source(&self, scope: &Scope, id: &SourceId) -> ProviderResult<Option<DataSource>> {
        let row = sqlx::query("SELECT * FROM oracle_sources WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_source(&row)?)),
        }
    }

    async fn sources(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<DataSource>> {
        let rows = sqlx::query(
            "SELECT * FROM oracle_sources WHERE tenant = ?1 AND account_id = ?2
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_source).collect()
    }

    async fn delete_source(&self, scope: &Scope, id: &SourceId) -> ProviderResult<()> {
        let row = sqlx::query("SELECT tenant, account_id FROM oracle_sources WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(()),
            Some(row) if !guard_scope(&row, scope)? => Ok(()),
            Some(_) => {
                sqlx::query("DELETE FROM oracle_sources WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(self.pool())
                    .await
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    async fn insert_request(&self, request: OracleRequest) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO oracle_requests
                (id, tenant, account_id, source_id, payload, status, attempts, next_attempt_at,
                 ttl_expires_at, result, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(request.id.as_str())
        .bind(request.tenant.as_str())
        .bind(request.account_id.as_str())
        .bind(request.source_id.as_str())
        .bind(to_json(&request.payload)?)
        .bind(request.status.to_string())
        .bind(request.attempts as i64)
        .bind(ms(request.next_attempt_at))
        .bind(ms(request.ttl_expires_at))
        .bind(request.result.as_ref().map(to_json).transpose()?)
        .bind(&request.error)
        .bind(ms(request.created_at))
        .bind(ms(request.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn request(
        &self,
        scope: &Scope,
        id: &RequestId,
    ) -> ProviderResult<Option<OracleRequest>> {
        let row = sqlx::query("SELECT * FROM oracle_requests WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_request(&row)?)),
        }
    }

    async fn request_in_tenant(
        &self,
        tenant: &TenantId,
        id: &RequestId,
    ) -> ProviderResult<Option<OracleRequest>> {
        let row = sqlx::query("SELECT * FROM oracle_requests WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                guard_tenant(&row, tenant)?;
                Ok(Some(decode_request(&row)?))
            }
        }
    }

    async fn requests(
        &self,
        scope: &Scope,
        status: Option<RequestStatus>,
        page: Page,
    ) -> ProviderResult<Vec<OracleRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM oracle_requests
                     WHERE tenant = ?1 AND account_id = ?2 AND status = ?3
                     ORDER BY created_at LIMIT ?4 OFFSET ?5",
                )
                .bind(scope.tenant.as_str())
                .bind(scope.account.as_str())
                .bind(status.to_string())
                .bind(page.limit as i64)
                .bind(page.offset as i64)
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM oracle_requests WHERE tenant = ?1 AND account_id = ?2
                     ORDER BY created_at LIMIT ?3 OFFSET ?4",
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

        rows.iter().map(decode_request).collect()
    }

    async fn claim_due_requests(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker: &str,
    ) -> ProviderResult<Vec<OracleRequest>> {
        let lease_floor = ms(now) - CLAIM_LEASE_SECS * 1_000;

        sqlx::query(
            "UPDATE oracle_requests SET claimed_by = ?1, claimed_at = ?2
             WHERE id IN (
                SELECT id FROM oracle_requests
                WHERE status = 'pending' AND next_attempt_at <= ?2
                  AND (claimed_by IS NULL OR claimed_at <= ?3)
                ORDER BY next_attempt_at
                LIMIT ?4
             )",
        )
        .bind(worker)
        .bind(ms(now))
        .bind(lease_floor)
        .bind(limit as i64)
        .execute(self.pool())
        .await
        .map_err(backend_err)?;

        let rows = sqlx::query(
            "SELECT * FROM oracle_requests
             WHERE claimed_by = ?1 AND claimed_at = ?2 AND status = 'pending'
             ORDER BY next_attempt_at",
        )
        .bind(worker)
        .bind(ms(now))
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_request).collect()
    }

    async fn update_request(&self, request: OracleRequest) -> ProviderResult<()> {
        let stored: Option<String> =
            sqlx::query("SELECT status FROM oracle_requests WHERE id = ?1")
                .bind(request.id.as_str())
                .fetch_optional(self.pool())
                .await
                .map_err(backend_err)?
                .map(|row| row.try_get("status").map_err(backend_err))
                .transpose()?;

        match stored.as_deref() {
            None => {
                return Err(ProviderError::Backend(format!("unknown request {}", request.id)))
            }
            Some("pending") => {}
            Some(_) => {
                return Err(ProviderError::TerminalState {
                    entity: "oracle request",
                    id: request.id.to_string(),
                })
            }
        }

        sqlx::query(
            "UPDATE oracle_requests
             SET status = ?1, attempts = ?2, next_attempt_at = ?3, result = ?4, error = ?5,
                 updated_at = ?6, claimed_by = NULL, claimed_at = NULL
             WHERE id = ?7",
        )
        .bind(request.status.to_string())
        .bind(request.attempts as i64)
        .bind(ms(request.next_attempt_at))
        .bind(request.result.as_ref().map(to_json).transpose()?)
        .bind(&request.error)
        .bind(ms(request.updated_at))
        .bind(request.id.as_str())
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_account_oracle_data(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let sources =
            sqlx::query("DELETE FROM oracle_sources WHERE tenant = ?1 AND account_id = ?2")
                .bind(tenant.as_str())
                .bind(account.as_str())
                .execute(self.pool())
                .await
                .map_err(backend_err)?;
        let requests =
            sqlx::query("DELETE FROM oracle_requests WHERE tenant = ?1 AND account_id = ?2")
                .bind(tenant.as_str())
                .bind(account.as_str())
                .execute(self.pool())
                .await
                .map_err(backend_err)?;
        Ok(sources.rows_affected() + requests.rows_affected())
    }
}
