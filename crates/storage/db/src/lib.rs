//! SQL storage backend.
//!
//! One table per repository; every row carries `(tenant, account_id)` with
//! a composite index, dispatcher tables add time-ordered claim indexes, and
//! append-only tables are fenced by triggers on top of the service-layer
//! discipline. Implements the full `strato-provider` trait surface.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod codec;
mod repos;
mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use strato_provider::{ProviderError, ProviderResult};
use tracing::debug;

pub(crate) const LOG_TARGET: &str = "db";

/// How long a dispatcher claim is honored before other workers may reclaim
/// the row. Guards against workers that died mid-claim.
pub(crate) const CLAIM_LEASE_SECS: i64 = 300;

pub(crate) fn backend_err(err: sqlx::Error) -> ProviderError {
    ProviderError::Backend(err.to_string())
}

#[derive(Debug, Clone)]
pub struct SqlStorage {
    pool: SqlitePool,
}

impl SqlStorage {
    /// Opens (creating if needed) a database at `path` and applies the
    /// schema.
    pub async fn open(path: &str) -> ProviderResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool =
            SqlitePoolOptions::new().connect_with(options).await.map_err(backend_err)?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database, used by tests. A single connection keeps
    /// every handle on the same database.
    pub async fn in_memory() -> ProviderResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend_err)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> ProviderResult<Self> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&pool).await.map_err(backend_err)?;
        }
        debug!(target: LOG_TARGET, "Schema applied.");
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
