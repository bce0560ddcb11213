use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strato_primitives::automation::{Job, Trigger};
use strato_primitives::id::{AccountId, FunctionId, JobId, TriggerId};
use strato_primitives::{Scope, TenantId};
use strato_provider::traits::automation::{JobProvider, TriggerProvider};
use strato_provider::{Page, ProviderResult};

use crate::codec::{from_json, from_ms, from_opt_ms, ms, opt_ms, parse_enum, to_json};
use crate::repos::{guard_scope, guard_tenant};
use crate::{backend_err, SqlStorage};

fn decode_job(row: &SqliteRow) -> ProviderResult<Job> {
    let last_result: Option<String> = row.try_get("last_result").map_err(backend_err)?;
    Ok(Job {
        id: JobId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        function_id: FunctionId::new(row.try_get::<String, _>("function_id").map_err(backend_err)?),
        name: row.try_get("name").map_err(backend_err)?,
        schedule: row.try_get("schedule").map_err(backend_err)?,
        enabled: row.try_get("enabled").map_err(backend_err)?,
        check_mode: parse_enum(
            &row.try_get::<String, _>("check_mode").map_err(backend_err)?,
            "check mode",
        )?,
        context: from_json(&row.try_get::<String, _>("context").map_err(backend_err)?)?,
        last_fired_at: from_opt_ms(row.try_get("last_fired_at").map_err(backend_err)?)?,
        last_result: last_result.as_deref().map(from_json).transpose()?,
        attempts: row.try_get::<i64, _>("attempts").map_err(backend_err)? as u64,
        version: row.try_get::<i64, _>("version").map_err(backend_err)? as u64,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

fn decode_trigger(row: &SqliteRow) -> ProviderResult<Trigger> {
    Ok(Trigger {
        id: TriggerId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        kind: row.try_get("kind").map_err(backend_err)?,
        rule: row.try_get("rule").map_err(backend_err)?,
        config: from_json(&row.try_get::<String, _>("config").map_err(backend_err)?)?,
        enabled: row.try_get("enabled").map_err(backend_err)?,
        version: row.try_get::<i64, _>("version").map_err(backend_err)? as u64,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

#[async_trait]
impl JobProvider for SqlStorage {
    async fn insert_job(&self, job: Job) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO jobs
                (id, tenant, account_id, function_id, name, schedule, enabled, check_mode,
                 context, last_fired_at, last_result, attempts, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(job.id.as_str())
        .bind(job.tenant.as_str())
        .bind(job.account_id.as_str())
        .bind(job.function_id.as_str())
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(job.enabled)
        .bind(job.check_mode.to_string())
        .bind(to_json(&job.context)?)
        .bind(opt_ms(job.last_fired_at))
        .bind(job.last_result.as_ref().map(to_json).transpose()?)
        .bind(job.attempts as i64)
        .bind(job.version as i64)
        .bind(ms(job.created_at))
        .bind(ms(job.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn job(&self, scope: &Scope, id: &JobId) -> ProviderResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_job(&row)?)),
        }
    }

    async fn job_in_tenant(&self, tenant: &TenantId, id: &JobId) -> ProviderResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                guard_tenant(&row, tenant)?;
                Ok(Some(decode_job(&row)?))
            }
        }
    }

    async fn jobs(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE tenant = ?1 AND account_id = ?2
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_job).collect()
    }

    async fn enabled_jobs(&self, page: Page) -> ProviderResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE enabled = 1 ORDER BY created_at LIMIT ?1 OFFSET ?2",
        )
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_job).collect()
    }

    async fn update_job(&self, job: Job, expected_version: u64) -> ProviderResult<()> {
        let result = sqlx::query(
            "UPDATE jobs
             SET function_id = ?1, name = ?2, schedule = ?3, enabled = ?4, check_mode = ?5,
                 context = ?6, last_fired_at = ?7, last_result = ?8, attempts = ?9,
                 version = ?10, updated_at = ?11
             WHERE id = ?12 AND tenant = ?13 AND version = ?14",
        )
        .bind(job.function_id.as_str())
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(job.enabled)
        .bind(job.check_mode.to_string())
        .bind(to_json(&job.context)?)
        .bind(opt_ms(job.last_fired_at))
        .bind(job.last_result.as_ref().map(to_json).transpose()?)
        .bind(job.attempts as i64)
        .bind(job.version as i64)
        .bind(ms(job.updated_at))
        .bind(job.id.as_str())
        .bind(job.tenant.as_str())
        .bind(expected_version as i64)
        .execute(self.pool())
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(self
                .versioned_miss("jobs", job.id.as_str(), job.tenant.as_str(), expected_version)
                .await?);
        }
        Ok(())
    }

    async fn delete_job(&self, scope: &Scope, id: &JobId) -> ProviderResult<()> {
        let row = sqlx::query("SELECT tenant, account_id FROM jobs WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(()),
            Some(row) if !guard_scope(&row, scope)? => Ok(()),
            Some(_) => {
                sqlx::query("DELETE FROM jobs WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(self.pool())
                    .await
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    async fn delete_account_jobs(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE tenant = ?1 AND account_id = ?2")
            .bind(tenant.as_str())
            .bind(account.as_str())
            .execute(self.pool())
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TriggerProvider for SqlStorage {
    async fn insert_trigger(&self, trigger: Trigger) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO triggers
                (id, tenant, account_id, kind, rule, config, enabled, version, created_at,
                 updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(trigger.id.as_str())
        .bind(trigger.tenant.as_str())
        .bind(trigger.account_id.as_str())
        .bind(&trigger.kind)
        .bind(&trigger.rule)
        .bind(to_json(&trigger.config)?)
        .bind(trigger.enabled)
        .bind(trigger.version as i64)
        .bind(ms(trigger.created_at))
        .bind(ms(trigger.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn trigger(&self, scope: &Scope, id: &TriggerId) -> ProviderResult<Option<Trigger>> {
        let row = sqlx::query("SELECT * FROM triggers WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_trigger(&row)?)),
        }
    }

    async fn triggers(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Trigger>> {
        let rows = sqlx::query(
            "SELECT * FROM triggers WHERE tenant = ?1 AND account_id = ?2
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_trigger).collect()
    }

    async fn update_trigger(&self, trigger: Trigger, expected_version: u64) -> ProviderResult<()> {
        let result = sqlx::query(
            "UPDATE triggers
             SET kind = ?1, rule = ?2, config = ?3, enabled = ?4, version = ?5, updated_at = ?6
             WHERE id = ?7 AND tenant = ?8 AND version = ?9",
        )
        .bind(&trigger.kind)
        .bind(&trigger.rule)
        .bind(to_json(&trigger.config)?)
        .bind(trigger.enabled)
        .bind(trigger.version as i64)
        .bind(ms(trigger.updated_at))
        .bind(trigger.id.as_str())
        .bind(trigger.tenant.as_str())
        .bind(expected_version as i64)
        .execute(self.pool())
        .await
        .map_err(backend_err)?;

        if result.rows_affected() == 0 {
            return Err(self
                .versioned_miss(
                    "triggers",
                    trigger.id.as_str(),
                    trigger.tenant.as_str(),
                    expected_version,
                )
                .await?);
        }
        Ok(())
    }

    async fn delete_trigger(&self, scope: &Scope, id: &TriggerId) -> ProviderResult<()> {
        let row = sqlx::query("SELECT tenant, account_id FROM triggers WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(()),
            Some(row) if !guard_scope(&row, scope)? => Ok(()),
            Some(_) => {
                sqlx::query("DELETE FROM triggers WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(self.pool())
                    .await
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    async fn delete_account_triggers(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let result = sqlx::query("DELETE FROM triggers WHERE tenant = ?1 AND account_id = ?2")
            .bind(tenant.as_str())
            .bind(account.as_str())
            .execute(self.pool())
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected())
    }
}
