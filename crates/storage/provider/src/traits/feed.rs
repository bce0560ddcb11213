use async_trait::async_trait;
use strato_primitives::feed::{Feed, FeedUpdate, UpdateStatus};
use strato_primitives::id::{AccountId, FeedId, UpdateId};
use strato_primitives::{Scope, TenantId};

use crate::{Page, ProviderResult};

#[async_trait]
pub trait FeedProvider: Send + Sync {
    async fn insert_feed(&self, feed: Feed) -> ProviderResult<()>;

    async fn feed(&self, scope: &Scope, id: &FeedId) -> ProviderResult<Option<Feed>>;

    async fn feed_in_tenant(&self, tenant: &TenantId, id: &FeedId)
        -> ProviderResult<Option<Feed>>;

    async fn feeds(&self, scope: &Scope, page: Page) -> ProviderResult<Vec<Feed>>;

    /// All enabled feeds across tenants, for the refresh loop.
    async fn enabled_feeds(&self, page: Page) -> ProviderResult<Vec<Feed>>;

    async fn update_feed(&self, feed: Feed, expected_version: u64) -> ProviderResult<()>;

    /// Atomically advances the feed head (`last_round_id`, `last_value`,
    /// `last_publish_at`) and appends the accepted update. Backed by a
    /// transaction in SQL stores.
    async fn publish_round(
        &self,
        feed: Feed,
        expected_version: u64,
        update: FeedUpdate,
    ) -> ProviderResult<()>;

    async fn delete_feed(&self, scope: &Scope, id: &FeedId) -> ProviderResult<()>;

    /// Feed updates are append-only; inserting an existing id fails.
    async fn insert_feed_update(&self, update: FeedUpdate) -> ProviderResult<()>;

    async fn feed_updates(
        &self,
        scope: &Scope,
        feed: &FeedId,
        round: Option<u64>,
        page: Page,
    ) -> ProviderResult<Vec<FeedUpdate>>;

    /// `pending → accepted | rejected` only.
    async fn transition_feed_update(
        &self,
        id: &UpdateId,
        status: UpdateStatus,
        error: Option<String>,
    ) -> ProviderResult<()>;

    /// Retention window enforcement: keeps the newest `keep` updates of the
    /// feed and removes the rest. Returns the number pruned.
    async fn prune_feed_updates(&self, feed: &FeedId, keep: usize) -> ProviderResult<u64>;

    async fn delete_account_feeds(
        &self,
        tenant: &TenantId,
        account: &AccountId,
    ) -> ProviderResult<u64>;
}
