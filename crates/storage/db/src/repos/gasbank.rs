use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strato_primitives::gasbank::{Balance, GasAccount, GasTransaction, GasTxKind, GasTxStatus};
use strato_primitives::id::{AccountId, GasAccountId, GasTxId};
use strato_primitives::{Scope, TenantId};
use strato_provider::traits::gasbank::{GasBankProvider, GasTxTransition};
use strato_provider::{Page, ProviderError, ProviderResult};

use crate::codec::{from_ms, from_opt_ms, ms, opt_ms, parse_enum};
use crate::repos::guard_scope;
use crate::{backend_err, SqlStorage, CLAIM_LEASE_SECS};

fn decode_account(row: &SqliteRow) -> ProviderResult<GasAccount> {
    Ok(GasAccount {
        id: GasAccountId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        wallet_address: row.try_get("wallet_address").map_err(backend_err)?,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        updated_at: from_ms(row.try_get("updated_at").map_err(backend_err)?)?,
    })
}

fn decode_tx(row: &SqliteRow) -> ProviderResult<GasTransaction> {
    Ok(GasTransaction {
        id: GasTxId::new(row.try_get::<String, _>("id").map_err(backend_err)?),
        tenant: TenantId::new(row.try_get::<String, _>("tenant").map_err(backend_err)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(backend_err)?),
        gas_account_id: GasAccountId::new(
            row.try_get::<String, _>("gas_account_id").map_err(backend_err)?,
        ),
        kind: parse_enum(&row.try_get::<String, _>("kind").map_err(backend_err)?, "ledger kind")?,
        amount: row.try_get("amount").map_err(backend_err)?,
        status: parse_enum(
            &row.try_get::<String, _>("status").map_err(backend_err)?,
            "ledger status",
        )?,
        attempts: row.try_get::<i64, _>("attempts").map_err(backend_err)? as u32,
        reference: row.try_get("reference").map_err(backend_err)?,
        next_attempt_at: from_opt_ms(row.try_get("next_attempt_at").map_err(backend_err)?)?,
        created_at: from_ms(row.try_get("created_at").map_err(backend_err)?)?,
        settled_at: from_opt_ms(row.try_get("settled_at").map_err(backend_err)?)?,
    })
}

#[async_trait]
impl GasBankProvider for SqlStorage {
    async fn insert_gas_account(&self, account: GasAccount) -> ProviderResult<()> {
        sqlx::query(
            "INSERT INTO gas_accounts
                (id, tenant, account_id, wallet_address, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(account.id.as_str())
        .bind(account.tenant.as_str())
        .bind(account.account_id.as_str())
        .bind(&account.wallet_address)
        .bind(ms(account.created_at))
        .bind(ms(account.updated_at))
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn gas_account(
        &self,
        scope: &Scope,
        id: &GasAccountId,
    ) -> ProviderResult<Option<GasAccount>> {
        let row = sqlx::query("SELECT * FROM gas_accounts WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_account(&row)?)),
        }
    }

    async fn gas_account_by_wallet(
        &self,
        scope: &Scope,
        wallet: &str,
    ) -> ProviderResult<Option<GasAccount>> {
        let row = sqlx::query("SELECT * FROM gas_accounts WHERE wallet_address = ?1")
            .bind(wallet)
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_account(&row)?)),
        }
    }

    async fn gas_accounts(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<GasAccount>> {
        let rows = sqlx::query(
            "SELECT * FROM gas_accounts WHERE tenant = ?1 AND account_id = ?2
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(scope.tenant.as_str())
        .bind(scope.account.as_str())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_account).collect()
    }

    async fn insert_gas_transaction(&self, tx: GasTransaction) -> ProviderResult<()> {
        let result = sqlx::query(
            "INSERT INTO gas_transactions
                (id, tenant, account_id, gas_account_id, kind, amount, status, attempts,
                 reference, next_attempt_at, created_at, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(tx.id.as_str())
        .bind(tx.tenant.as_str())
        .bind(tx.account_id.as_str())
        .bind(tx.gas_account_id.as_str())
        .bind(tx.kind.to_string())
        .bind(tx.amount)
        .bind(tx.status.to_string())
        .bind(tx.attempts as i64)
        .bind(&tx.reference)
        .bind(opt_ms(tx.next_attempt_at))
        .bind(ms(tx.created_at))
        .bind(opt_ms(tx.settled_at))
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ProviderError::Immutable("gas transaction"))
            }
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn gas_transaction(
        &self,
        scope: &Scope,
        id: &GasTxId,
    ) -> ProviderResult<Option<GasTransaction>> {
        let row = sqlx::query("SELECT * FROM gas_transactions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(backend_err)?;

        match row {
            None => Ok(None),
            Some(row) if !guard_scope(&row, scope)? => Ok(None),
            Some(row) => Ok(Some(decode_tx(&row)?)),
        }
    }

    async fn gas_transactions(
        &self,
        scope: &Scope,
        gas_account: Option<&GasAccountId>,
        page: Page,
    ) -> ProviderResult<Vec<GasTransaction>> {
        let rows = match gas_account {
            Some(gas_account) => {
                sqlx::query(
                    "SELECT * FROM gas_transactions
                     WHERE tenant = ?1 AND account_id = ?2 AND gas_account_id = ?3
                     ORDER BY created_at LIMIT ?4 OFFSET ?5",
                )
                .bind(scope.tenant.as_str())
                .bind(scope.account.as_str())
                .bind(gas_account.as_str())
                .bind(page.limit as i64)
                .bind(page.offset as i64)
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM gas_transactions WHERE tenant = ?1 AND account_id = ?2
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

        rows.iter().map(decode_tx).collect()
    }

    async fn pending_deposit_by_reference(
        &self,
        reference: &str,
    ) -> ProviderResult<Option<GasTransaction>> {
        let row = sqlx::query(
            "SELECT * FROM gas_transactions
             WHERE kind = 'deposit' AND status = 'pending' AND reference = ?1
             ORDER BY created_at LIMIT 1",
        )
        .bind(reference)
        .fetch_optional(self.pool())
        .await
        .map_err(backend_err)?;

        row.as_ref().map(decode_tx).transpose()
    }

    async fn claim_due_withdrawals(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        worker: &str,
    ) -> ProviderResult<Vec<GasTransaction>> {
        let lease_floor = ms(now) - CLAIM_LEASE_SECS * 1_000;

        sqlx::query(
            "UPDATE gas_transactions SET claimed_by = ?1, claimed_at = ?2
             WHERE id IN (
                SELECT id FROM gas_transactions
                WHERE kind = 'withdraw' AND status = 'pending'
                  AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)
                  AND (claimed_by IS NULL OR claimed_at <= ?3)
                ORDER BY COALESCE(next_attempt_at, created_at)
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
            "SELECT * FROM gas_transactions
             WHERE claimed_by = ?1 AND claimed_at = ?2 AND status = 'pending'
             ORDER BY COALESCE(next_attempt_at, created_at)",
        )
        .bind(worker)
        .bind(ms(now))
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        rows.iter().map(decode_tx).collect()
    }

    async fn transition_gas_transaction(
        &self,
        id: &GasTxId,
        transition: GasTxTransition,
    ) -> ProviderResult<()> {
        let stored: Option<String> =
            sqlx::query("SELECT status FROM gas_transactions WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(self.pool())
                .await
                .map_err(backend_err)?
                .map(|row| row.try_get("status").map_err(backend_err))
                .transpose()?;

        match stored.as_deref() {
            None => {
                return Err(ProviderError::Backend(format!("unknown gas transaction {id}")))
            }
            Some("pending") => {}
            Some(_) => {
                return Err(ProviderError::TerminalState {
                    entity: "gas transaction",
                    id: id.to_string(),
                })
            }
        }

        sqlx::query(
            "UPDATE gas_transactions
             SET status = ?1, attempts = ?2, next_attempt_at = ?3, settled_at = ?4,
                 claimed_by = NULL, claimed_at = NULL
             WHERE id = ?5",
        )
        .bind(transition.status.to_string())
        .bind(transition.attempts as i64)
        .bind(opt_ms(transition.next_attempt_at))
        .bind(opt_ms(transition.settled_at))
        .bind(id.as_str())
        .execute(self.pool())
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn balance(&self, gas_account: &GasAccountId) -> ProviderResult<Balance> {
        let rows = sqlx::query(
            "SELECT kind, status, COALESCE(SUM(amount), 0) AS total
             FROM gas_transactions WHERE gas_account_id = ?1
             GROUP BY kind, status",
        )
        .bind(gas_account.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(backend_err)?;

        let mut balance = Balance::default();
        for row in &rows {
            let kind: GasTxKind =
                parse_enum(&row.try_get::<String, _>("kind").map_err(backend_err)?, "ledger kind")?;
            let status: GasTxStatus = parse_enum(
                &row.try_get::<String, _>("status").map_err(backend_err)?,
                "ledger status",
            )?;
            let total: i64 = row.try_get("total").map_err(backend_err)?;

            match (kind, status) {
                (GasTxKind::Deposit, GasTxStatus::Settled) => balance.available += total,
                (GasTxKind::Withdraw, GasTxStatus::Settled) => balance.available -= total,
                (GasTxKind::Withdraw, GasTxStatus::Pending) => {
                    balance.pending_withdrawals += total
                }
                (GasTxKind::Fee, GasTxStatus::Settled) => balance.available -= total,
                (GasTxKind::Reserve, GasTxStatus::Settled) => balance.available -= total,
                (GasTxKind::Release, GasTxStatus::Settled) => balance.available += total,
                _ => {}
            }
        }
        Ok(balance)
    }

    async fn delete_account_gas_data(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64> {
        let accounts =
            sqlx::query("DELETE FROM gas_accounts WHERE tenant = ?1 AND account_id = ?2")
                .bind(tenant.as_str())
                .bind(account.as_str())
                .execute(self.pool())
                .await
                .map_err(backend_err)?;
        let txs =
            sqlx::query("DELETE FROM gas_transactions WHERE tenant = ?1 AND account_id = ?2")
                .bind(tenant.as_str())
                .bind(account.as_str())
                .execute(self.pool())
                .await
                .map_err(backend_err)?;
        Ok(accounts.rows_affected() + txs.rows_affected())
    }
}
