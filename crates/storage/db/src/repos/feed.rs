use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use strato_primitives::feed::{Feed, FeedUpdate, UpdateStatus};
use strato_primitives::id::{AccountId, FeedId, UpdateId};
use strato_primitives::{Scope, TenantId};
use strato_provider::traits::feed::FeedProvider;
use strato_provider::{Page, ProviderError, ProviderResult};

use crate::codec::{from_json, from_ms, from_opt_ms, ms, opt_ms, parse_enum, to_json};
use crate::repos::{guard_scope, guard_tenant};
use crate::{backend_err, SqlStorage};

fn decode_feed(row: &SqliteRow) -> ProviderResult<Feed> {
    Ok(Feed {
        id: FeedId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        pair: row.try_get("pair").map_err(backend_err)?,
        decimals: row.try_get::<i64, _>("decimals").map_err(backend_err)? as u8,
        heartbeat_secs: row.try_get::<i64, _>("heartbeat_secs").map_err(backend_err)? as u64,
        threshold_ppm: row.try_get::<i64, _>("threshold_ppm").map_err(backend_err)? as u32,
        aggregation: parse_enum(
            &row.try_get::<String, _>("aggregation").map_err(backend_err)?,
            "aggregation",
        )?,
        signer_set: from_json(&row.try_get::<String, _>("signer_set").map_err(backend_err)?)?,
        threshold: row.try_get::<i64, _>("threshold").map_err(backend_err)? as u32,
        last_value: row.try_get("last_value").map_err(backend_err)?,
        last_round_id: row.try_get::<i64, _>("last_round_id").map_err(backend_err)? as u64,
        last_publish_at: from_opt_ms(row.try_get("last_publish_at").map_err(backend_err)?)?,
        enabled: row.try_get("enabled").map_err(backend_err)?,
        version: row.try_get::<i64, _>("version").map_err(backend_err)? as u64,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

fn decode_update(row: &SqliteRow) -> ProviderResult<FeedUpdate> {
    Ok(FeedUpdate {
        id: UpdateId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        feed_id: FeedId::new(row.try_get::<String, _>("feed_id").map_err(backend_err)?),
        round_id: row.try_get::<i64, _>("round_id").map_err(backend_err)? as u64,
        price: row.try_get("price").map_err(backend_err)?,
        signer: row.try_get("signer").map_err(backend_err)?,
        signature: row.try_get("signature").map_err(backend_err)?,
        timestamp: from_ms(row.try_get("timestamp").map_err(backend_err)?)?,
        status: parse_enum(
            &row.try_get::<String, _>("status").map_err(backend_err)?,
            "update status",
        )?,
        error: row.try_get("error").map_err(backend_err)?,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
    })
}

/// Full-row feed update; shared by `update_feed` and `publish_round`.
async fn write_feed<'e, E>(executor: E, feed: &Feed, expected_version: u64) -> sqlx::Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE feeds
         SET pair = ?1, decimals = ?2, heartbeat_secs = ?3, threshold_ppm = ?4,
             aggregation = ?5, signer_set = ?6, threshold = ?7, last_value = ?8,
             last_round_id = ?9, last_publish_at = ?10, enabled = ?11, version = ?12,
             updated_at = ?13
         WHERE id = ?14 AND tenant = ?15 AND version = ?16",
    )
    .bind(&feed.pair)
    .bind(feed.decimals as i64)
    .bind(feed.heartbeat_secs as i64)
    .bind(feed.threshold_ppm as i64)
    .bind(feed.aggregation.to_string())
    .bind(serde_json::to_string(&feed.signer_set).unwrap_or_default())
    .bind(feed.threshold as i64)
    .bind(feed.last_value)
    .bind(feed.last_round_id as i64)
    .bind(opt_ms(feed.last_publish_at))
    .bind(feed.enabled)
    .bind(feed.version as i64)
    .bind(ms(feed.updated_at))
    .bind(feed.id.as_str())
    .bind(feed.tenant.as_str())
    .bind(expected_version as i64)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

async fn write_update<'e, E>(executor: E, update: &FeedUpdate) -> ProviderResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO feed_updates
            (id, tenant, account_id, feed_id, round_id, price, signer, signature, timestamp,
             status, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(update.id.as_str())
    .bind(update.tenant.as_str())
    .bind(update.account_id.as_str())
    .bind(update.feed_id.as_str())
    .bind(update.round_id as i64)
    .bind(update.price)
    .bind(&update.signer)
    .bind(&update.signature)
    .bind(ms(update.timestamp))
    .bind(update.status.to_string())
    .bind(&update.error)
    .bind(ms(update.created_at))
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(ProviderError::Immutable("feed update"))
        }
        Err(err) => Err(backend_err(err)),
    }
}

#[async_trait]
impl FeedProvider for SqlStorage {
    async fn insert_feed(&self, feed: Feed) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO feeds
                (id, tenant, account_id, pair, decimals, heartbeat_secs, threshold_ppm,
                 aggregation, signer_set, threshold, last_value, last_round_id, last_publish_at,
                 enabled, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(feed.id.as_str())
        .bind(feed.tenant.as_str())
        .bind(feed.account_id.as_str())
        .bind(&feed.pair)
        .bind(feed.decimals as i64)
        .bind(feed.heartbeat_secs as i64)
        .bind(feed.threshold_ppm as i64)
        .bind(feed.aggregation.to_string())
        .bind(to_json(&feed.signer_set)?)
        .bind(feed.threshold as i64)
        .bind(feed.last_value)
        .bind(feed.last_round_id as i64)
        .bind(opt_ms(feed.last_publish_at))
        .bind(feed.enabled)
        .bind(feed.version as i64)
        .bind(ms(feed.created_at))
        .bind(ms(feed.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn feed(&self, scope: &Scope, id: &FeedId) -> ProviderResult<Option<Feed>> {
        let row = sqlx::query("SELECT * FROM feeds WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_feed(&row)?)),
        }
    }

    async fn feed_in_tenant(
        &self,
        tenant: &TenantId,
        id: &FeedId,
    ) -> ProviderResult<Option<Feed>> {
        let row = sqlx::query("SELECT * FROM feeds WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                guard_tenant(&row, tenant)?;
                Ok(Some(decode_feed(&row)?))
            }
        }
    }

    async fn feeds(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Feed>> {
        let rows = sqlx::query(
            "SELECT * FROM feeds WHERE tenant = ?1 AND account_id = ?2
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_feed).collect()
    }

    async fn enabled_feeds(&self, page: Page) -> ProviderResult<Vec<Feed>> {
        let rows = sqlx::query(
            "SELECT * FROM feeds WHERE enabled = 1 ORDER BY created_at LIMIT ?1 OFFSET ?2",
        )
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_feed).collect()
    }

    async fn update_feed(&self, feed: Feed, expected_version: u64) -> ProviderResult<()> {
        let affected =
            write_feed(self.pool(), &feed, expected_version).await.map_err(backend_err)?;
        if affected == 0 {
            return Err(self
                .versioned_miss("feeds", feed.id.as_str(), feed.tenant.as_str(), expected_version)
                .await?);
        }
        Ok(())
    }

    async fn publish_round(
        &self,
        feed: Feed,
        expected_version: u64,
        update: FeedUpdate,
    ) -> ProviderResult<()> {
        let mut tx = self.pool().begin().await.map_err(backend_err)?;

        let affected =
            write_feed(&mut *tx, &feed, expected_version).await.map_err(backend_err)?;
        if affected == 0 {
            drop(tx);
            return Err(self
                .versioned_miss("feeds", feed.id.as_str(), feed.tenant.as_str(), expected_version)
                .await?);
        }

        write_update(&mut *tx, &update).await?;
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn delete_feed(&self, scope: &Scope, id: &FeedId) -> ProviderResult<()> {
        let row = sqlx::query("SELECT tenant, account_id FROM feeds WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(()),
            Some(row) if !guard_scope(&row, scope)? => Ok(()),
            Some(_) => {
                let mut tx = self.pool().begin().await.map_err(backend_err)?;
                sqlx::query("DELETE FROM feed_updates WHERE feed_id = ?1")
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(backend_err)?;
                sqlx::query("DELETE FROM feeds WHERE id = ?1")
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(backend_err)?;
                tx.commit().await.map_err(backend_err)?;
                Ok(())
            }
        }
    }

    async fn insert_feed_update(&self, update: FeedUpdate) -> ProviderResult<()> {
        write_update(self.pool(), &update).await
    }

    async fn feed_updates(
        &self,
        scope: &Scope,
        feed: &FeedId,
        round: Option<u64>,
        page: Page,
    ) -> ProviderResult<Vec<FeedUpdate>> {
        let rows = match round {
            Some(round) => {
                sqlx::query(
                    "SELECT * FROM feed_updates
                     WHERE tenant = ?1 AND account_id = ?2 AND feed_id = ?3 AND round_id = ?4
                     ORDER BY created_at LIMIT ?5 OFFSET ?6",
                )
                .bind(scope.tenant.as_str())
                .bind(scope.account.as_str())
                .bind(feed.as_str())
                .bind(round as i64)
                .bind(page.limit as i64)
                .bind(page.offset as i64)
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM feed_updates
                     WHERE tenant = ?1 AND account_id = ?2 AND feed_id = ?3
                     ORDER BY created_at LIMIT ?4 OFFSET ?5",
                )
                .bind(scope.tenant.as_str())
                .bind(scope.account.as_str())
                .bind(feed.as_str())
                .bind(page.limit as i64)
                .bind(page.offset as i64)
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(backend_err)?;

        rows.iter().map(decode_update).collect()
    }

    async fn transition_feed_update(
        &self,
        id: &UpdateId,
        status: UpdateStatus,
        error: Option<String>,
    ) -> ProviderResult<()> {
        let stored: Option<String> =
            sqlx::query("SELECT status FROM feed_updates WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(self.pool())
                .await
                .map_err(backend_err)?
                .map(|row| row.try_get("status").map_err(backend_err))
                .transpose()?;

        match stored.as_deref() {
            None => return Err(ProviderError::Backend(format!("unknown feed update {id}"))),
            Some("pending") => {}
            Some(_) => {
                return Err(ProviderError::TerminalState {
                    entity: "feed update",
                    id: id.to_string(),
                })
            }
        }

        sqlx::query("UPDATE feed_updates SET status = ?1, error = ?2 WHERE id = ?3")
            .bind(status.to_string())
            .bind(&error)
            .bind(id.as_str())
            .execute(self.pool())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn prune_feed_updates(&self, feed: &FeedId, keep: usize) -> ProviderResult<u64> {
        let result = sqlx::query(
            "DELETE FROM feed_updates
             WHERE feed_id = ?1 AND id NOT IN (
                SELECT id FROM feed_updates WHERE feed_id = ?1
                ORDER BY created_at DESC LIMIT ?2
             )",
        )
        .bind(feed.as_str())
        .bind(keep as i64)
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_account_feeds(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let updates =
            sqlx::query("DELETE FROM feed_updates WHERE tenant = ?1 AND account_id = ?2")
                .bind(tenant.as_str())
                .bind(account.as_str())
                .execute(self.pool())
                .await
                .map_err(backend_err)?;
        let feeds = sqlx::query("DELETE FROM feeds WHERE tenant = ?1 AND account_id = ?2")
            .bind(tenant.as_str())
            .bind(account.as_str())
            .execute(self.pool())
            .await
            .map_err(backend_err)?;
        Ok(updates.rows_affected() + feeds.rows_affected())
    }
}
