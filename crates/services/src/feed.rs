//! Price/data feeds: deviation- and heartbeat-triggered publication plus
//! the signed submission quorum path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use strato_bus::{Envelope, EventBus};
use strato_crypto::{verify_hex, SigningPair};
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_metrics::metrics::{Counter, Gauge};
use strato_metrics::Metrics;
use strato_primitives::feed::{Aggregation, Feed, FeedUpdate, UpdateStatus};
use strato_primitives::id::{AccountId, FeedId, UpdateId};
use strato_primitives::{CallerContext, Scope};
use strato_provider::{Page, StorageProvider};
use strato_tasks::TaskSpawner;
use tracing::{debug, info, warn};

use crate::{spawn_account_cascade, topics, ServiceError};

pub(crate) const LOG_TARGET: &str = "feed";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("price source unavailable: {0}")]
    Unavailable(String),
}

/// External quote source consumed by the refresh loop.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Quotes for `pair`, already scaled to the feed's decimals.
    async fn quotes(&self, pair: &str) -> Result<Vec<i64>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Interval between refresh passes.
    pub refresh_interval: Duration,
    /// Submitted values must sit within this many ppm of the round median
    /// to count toward the quorum.
    pub submission_window_ppm: u32,
    /// Feed updates retained per feed; older rows are pruned.
    pub history_window: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(15),
            submission_window_ppm: 20_000,
            history_window: Some(10_000),
        }
    }
}

/// Fields accepted when creating a feed.
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub pair: String,
    pub decimals: u8,
    pub heartbeat_secs: u64,
    pub threshold_ppm: u32,
    pub aggregation: Aggregation,
    pub signer_set: Vec<String>,
    pub threshold: u32,
}

/// Fields a feed update may change; `None` leaves the stored value.
#[derive(Debug, Default, Clone)]
pub struct FeedPatch {
    pub heartbeat_secs: Option<u64>,
    pub threshold_ppm: Option<u32>,
    pub aggregation: Option<Aggregation>,
    pub signer_set: Option<Vec<String>>,
    pub threshold: Option<u32>,
}

/// A signed round submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub round_id: u64,
    pub price: i64,
    pub signer: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Metrics)]
#[metrics(scope = "feed.engine")]
struct EngineMetrics {
    /// Rounds published (refresh and quorum paths).
    publishes: Counter,
    /// Submissions received.
    submissions: Counter,
    /// Submissions rejected (unknown signer, bad signature, stale round).
    rejections: Counter,
    /// Refresh passes that failed to fetch quotes.
    refresh_errors: Counter,
}

/// Per-feed staleness gauge, labeled by feed id.
#[derive(Metrics)]
#[metrics(scope = "feed")]
struct StalenessMetrics {
    /// Seconds since the feed last published.
    staleness_seconds: Gauge,
}

struct EngineInner {
    storage: Arc<dyn StorageProvider>,
    fetcher: Arc<dyn PriceFetcher>,
    signer: Arc<SigningPair>,
    events: EventBus,
    config: FeedConfig,
    metrics: EngineMetrics,
}

/// Feed command surface plus the refresh loop.
pub struct FeedService {
    base: ServiceBase,
    inner: Arc<EngineInner>,
    spawner: TaskSpawner,
}

impl FeedService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        fetcher: Arc<dyn PriceFetcher>,
        signer: Arc<SigningPair>,
        events: EventBus,
        spawner: TaskSpawner,
        config: FeedConfig,
    ) -> Self {
        let descriptor = ModuleDescriptor::new("pricefeed", "data", Category::Service)
            .requires("storage")
            .requires("eventBus")
            .provides("pricefeed");
        let inner = Arc::new(EngineInner {
            storage,
            fetcher,
            signer,
            events,
            config,
            metrics: EngineMetrics::default(),
        });
        Self { base: ServiceBase::new(descriptor), inner, spawner }
    }

    pub async fn create_feed(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        spec: FeedSpec,
    ) -> Result<Feed, ServiceError> {
        if spec.pair.is_empty() {
            return Err(ServiceError::Validation("feed pair is required".into()));
        }
        if spec.threshold > 0 && (spec.threshold as usize) > spec.signer_set.len() {
            return Err(ServiceError::Validation(format!(
                "threshold {} exceeds signer set size {}",
                spec.threshold,
                spec.signer_set.len()
            )));
        }

        let now = Utc::now();
        let feed = Feed {
            id: FeedId::random(),
            account_id: account_id.clone(),
            tenant: caller.tenant.clone(),
            pair: spec.pair,
            decimals: spec.decimals,
            heartbeat_secs: spec.heartbeat_secs,
            threshold_ppm: spec.threshold_ppm,
            aggregation: spec.aggregation,
            signer_set: spec.signer_set,
            threshold: spec.threshold,
            last_value: None,
            last_round_id: 0,
            last_publish_at: None,
            enabled: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.inner.storage.insert_feed(feed.clone()).await?;
        info!(target: LOG_TARGET, feed = %feed.id, pair = feed.pair, "Feed created.");
        Ok(feed)
    }

    pub async fn get(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FeedId,
    ) -> Result<Feed, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.inner.storage.feed(&scope, id).await?.ok_or(ServiceError::NotFound("feed"))
    }

    pub async fn list(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        page: Page,
    ) -> Result<Vec<Feed>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.inner.storage.feeds(&scope, page).await?)
    }

    /// Applies a patch with optimistic concurrency; a conflicting write is
    /// retried once against the reloaded row.
    pub async fn update_feed(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FeedId,
        patch: FeedPatch,
    ) -> Result<Feed, ServiceError> {
        match self.apply_patch(caller, account_id, id, &patch).await {
            Err(ServiceError::Storage(strato_provider::ProviderError::Conflict { .. })) => {
                self.apply_patch(caller, account_id, id, &patch).await
            }
            other => other,
        }
    }

    async fn apply_patch(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FeedId,
        patch: &FeedPatch,
    ) -> Result<Feed, ServiceError> {
        let mut feed = self.get(caller, account_id, id).await?;
        let expected = feed.version;

        if let Some(heartbeat_secs) = patch.heartbeat_secs {
            feed.heartbeat_secs = heartbeat_secs;
        }
        if let Some(threshold_ppm) = patch.threshold_ppm {
            feed.threshold_ppm = threshold_ppm;
        }
        if let Some(aggregation) = patch.aggregation {
            feed.aggregation = aggregation;
        }
        if let Some(signer_set) = &patch.signer_set {
            feed.signer_set = signer_set.clone();
        }
        if let Some(threshold) = patch.threshold {
            feed.threshold = threshold;
        }
        if feed.threshold > 0 && (feed.threshold as usize) > feed.signer_set.len() {
            return Err(ServiceError::Validation(format!(
                "threshold {} exceeds signer set size {}",
                feed.threshold,
                feed.signer_set.len()
            )));
        }
        feed.version += 1;
        feed.updated_at = Utc::now();

        self.inner.storage.update_feed(feed.clone(), expected).await?;
        Ok(feed)
    }

    pub async fn set_enabled(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FeedId,
        enabled: bool,
    ) -> Result<Feed, ServiceError> {
        let mut feed = self.get(caller, account_id, id).await?;
        let expected = feed.version;
        feed.enabled = enabled;
        feed.version += 1;
        feed.updated_at = Utc::now();
        self.inner.storage.update_feed(feed.clone(), expected).await?;
        Ok(feed)
    }

    pub async fn delete(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        id: &FeedId,
    ) -> Result<(), ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        self.inner.storage.delete_feed(&scope, id).await?;
        Ok(())
    }

    pub async fn updates(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        feed: &FeedId,
        round: Option<u64>,
        page: Page,
    ) -> Result<Vec<FeedUpdate>, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        Ok(self.inner.storage.feed_updates(&scope, feed, round, page).await?)
    }

    /// Signed submission path. Unknown signers, bad signatures and stale
    /// rounds are recorded as `rejected`; once `threshold` distinct valid
    /// signers agree on a round within the aggregation window, the round is
    /// accepted and the aggregate becomes `last_value`.
    pub async fn submit_update(
        &self,
        caller: &CallerContext,
        feed_id: &FeedId,
        submission: Submission,
    ) -> Result<FeedUpdate, ServiceError> {
        self.inner.metrics.submissions.increment(1);

        let feed = self
            .inner
            .storage
            .feed_in_tenant(&caller.tenant, feed_id)
            .await?
            .ok_or(ServiceError::NotFound("feed"))?;

        if let Some(reason) = self.inner.rejection_reason(&feed, &submission) {
            self.inner.metrics.rejections.increment(1);
            let update = self
                .inner
                .record_update(&feed, &submission, UpdateStatus::Rejected, Some(reason))
                .await?;
            return Ok(update);
        }

        let update =
            self.inner.record_update(&feed, &submission, UpdateStatus::Pending, None).await?;
        self.inner.try_accept_round(&feed, submission.round_id).await?;

        // Re-read so the caller sees the post-quorum status.
        let scope = Scope::new(feed.tenant.clone(), feed.account_id.clone());
        let updates = self
            .inner
            .storage
            .feed_updates(&scope, &feed.id, Some(submission.round_id), Page::default())
            .await?;
        Ok(updates.into_iter().find(|u| u.id == update.id).unwrap_or(update))
    }

    /// Directly publishes a value as the next round (the
    /// `pricefeed.publish` action path). Deviation and heartbeat gating do
    /// not apply; the caller decided to publish.
    pub async fn publish_value(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        feed_id: &FeedId,
        price: i64,
    ) -> Result<FeedUpdate, ServiceError> {
        let scope = Scope::new(caller.tenant.clone(), account_id.clone());
        let feed =
            self.inner.storage.feed(&scope, feed_id).await?.ok_or(ServiceError::NotFound("feed"))?;
        Ok(self.inner.publish(feed, price, Utc::now()).await?)
    }

    /// One refresh pass; exposed for deterministic tests.
    #[cfg(test)]
    pub(crate) async fn run_refresh_at(&self, now: DateTime<Utc>) {
        self.inner.refresh_pass(now).await;
    }
}

impl EngineInner {
    /// Refresh loop body: fetch, aggregate, publish on deviation or
    /// heartbeat, and update staleness gauges.
    async fn refresh_pass(&self, now: DateTime<Utc>) {
        let feeds = match self.storage.enabled_feeds(Page { limit: 1_000, offset: 0 }).await {
            Ok(feeds) => feeds,
            Err(err) => {
                warn!(target: LOG_TARGET, %err, "Enabled-feed scan failed.");
                return;
            }
        };

        for feed in feeds {
            let staleness = feed
                .last_publish_at
                .map(|at| (now - at).num_seconds().max(0) as f64)
                .unwrap_or(f64::INFINITY);
            StalenessMetrics::new_with_labels(&[("feed", feed.id.to_string())])
                .staleness_seconds
                .set(staleness);

            let quotes = match self.fetcher.quotes(&feed.pair).await {
                Ok(quotes) if !quotes.is_empty() => quotes,
                Ok(_) => continue,
                Err(err) => {
                    self.metrics.refresh_errors.increment(1);
                    warn!(target: LOG_TARGET, feed = %feed.id, %err, "Quote fetch failed.");
                    continue;
                }
            };

            let value = aggregate(feed.aggregation, quotes);
            if !self.should_publish(&feed, value, now) {
                continue;
            }

            if let Err(err) = self.publish(feed, value, now).await {
                warn!(target: LOG_TARGET, %err, "Round publication failed.");
            }
        }
    }

    /// Deviation (`|Δ| / last ≥ threshold_ppm`) or heartbeat elapsed.
    fn should_publish(&self, feed: &Feed, value: i64, now: DateTime<Utc>) -> bool {
        let Some(last) = feed.last_value else { return true };
        let Some(last_publish) = feed.last_publish_at else { return true };

        if feed.heartbeat_secs > 0
            && now - last_publish >= chrono::Duration::seconds(feed.heartbeat_secs as i64)
        {
            return true;
        }
        deviation_ppm(last, value) >= feed.threshold_ppm as u64
    }

    /// Advances the feed head and appends the accepted round atomically.
    async fn publish(
        &self,
        mut feed: Feed,
        price: i64,
        now: DateTime<Utc>,
    ) -> Result<FeedUpdate, ServiceError> {
        let expected = feed.version;
        let round_id = feed.last_round_id + 1;

        feed.last_round_id = round_id;
        feed.last_value = Some(price);
        feed.last_publish_at = Some(now);
        feed.version += 1;
        feed.updated_at = now;

        let message = round_message(&feed.id, round_id, price, now);
        let update = FeedUpdate {
            id: UpdateId::random(),
            feed_id: feed.id.clone(),
            account_id: feed.account_id.clone(),
            tenant: feed.tenant.clone(),
            round_id,
            price,
            signer: self.signer.public_key_hex(),
            signature: self.signer.sign_hex(&message),
            timestamp: now,
            status: UpdateStatus::Accepted,
            error: None,
            created_at: now,
        };

        self.storage.publish_round(feed.clone(), expected, update.clone()).await?;
        self.metrics.publishes.increment(1);

        if let Some(keep) = self.config.history_window {
            if let Err(err) = self.storage.prune_feed_updates(&feed.id, keep).await {
                warn!(target: LOG_TARGET, feed = %feed.id, %err, "History pruning failed.");
            }
        }

        debug!(target: LOG_TARGET, feed = %feed.id, round_id, price, "Round published.");
        self.events.publish(
            topics::FEED_PUBLISHED,
            Envelope::new(
                topics::FEED_PUBLISHED,
                json!({"feed_id": feed.id, "round_id": round_id, "price": price}),
            ),
        );
        Ok(update)
    }

    /// Validation of one submission against the feed; `None` means valid.
    fn rejection_reason(&self, feed: &Feed, submission: &Submission) -> Option<String> {
        if !feed.signer_set.iter().any(|signer| signer == &submission.signer) {
            return Some("unknown_signer".to_owned());
        }

        let message =
            round_message(&feed.id, submission.round_id, submission.price, submission.timestamp);
        if verify_hex(&submission.signer, &message, &submission.signature).is_err() {
            return Some("invalid_signature".to_owned());
        }

        // Feed publication monotonically advances the round id.
        if submission.round_id <= feed.last_round_id {
            return Some("stale_round".to_owned());
        }
        None
    }

    async fn record_update(
        &self,
        feed: &Feed,
        submission: &Submission,
        status: UpdateStatus,
        error: Option<String>,
    ) -> Result<FeedUpdate, ServiceError> {
        let update = FeedUpdate {
            id: UpdateId::random(),
            feed_id: feed.id.clone(),
            account_id: feed.account_id.clone(),
            tenant: feed.tenant.clone(),
            round_id: submission.round_id,
            price: submission.price,
            signer: submission.signer.clone(),
            signature: submission.signature.clone(),
            timestamp: submission.timestamp,
            status,
            error,
            created_at: Utc::now(),
        };
        self.storage.insert_feed_update(update.clone()).await?;
        Ok(update)
    }

    /// Accepts the round once enough distinct valid signers agree within
    /// the aggregation window.
    async fn try_accept_round(&self, feed: &Feed, round_id: u64) -> Result<(), ServiceError> {
        let scope = Scope::new(feed.tenant.clone(), feed.account_id.clone());
        let pending: Vec<FeedUpdate> = self
            .storage
            .feed_updates(&scope, &feed.id, Some(round_id), Page { limit: 1_000, offset: 0 })
            .await?
            .into_iter()
            .filter(|update| update.status == UpdateStatus::Pending)
            .collect();

        let mut values: Vec<i64> = pending.iter().map(|update| update.price).collect();
        if values.is_empty() {
            return Ok(());
        }
        values.sort_unstable();
        let median = values[values.len() / 2];

        // Submissions outside the window don't count toward the quorum.
        let in_window: Vec<&FeedUpdate> = pending
            .iter()
            .filter(|update| {
                deviation_ppm(median, update.price) <= self.config.submission_window_ppm as u64
            })
            .collect();

        let mut signers: Vec<&str> =
            in_window.iter().map(|update| update.signer.as_str()).collect();
        signers.sort_unstable();
        signers.dedup();
        if (signers.len() as u32) < feed.threshold.max(1) {
            return Ok(());
        }

        let aggregate_value =
            aggregate(feed.aggregation, in_window.iter().map(|u| u.price).collect());

        // Advance the head, then flip the quorum members to accepted.
        let mut head = feed.clone();
        let expected = head.version;
        let now = Utc::now();
        head.last_round_id = round_id;
        head.last_value = Some(aggregate_value);
        head.last_publish_at = Some(now);
        head.version += 1;
        head.updated_at = now;
        self.storage.update_feed(head, expected).await?;

        for update in &in_window {
            if let Err(err) =
                self.storage.transition_feed_update(&update.id, UpdateStatus::Accepted, None).await
            {
                warn!(target: LOG_TARGET, update = %update.id, %err, "Accept transition failed.");
            }
        }

        self.metrics.publishes.increment(1);
        info!(
            target: LOG_TARGET,
            feed = %feed.id,
            round_id,
            value = aggregate_value,
            signers = signers.len(),
            "Round accepted by quorum."
        );
        self.events.publish(
            topics::FEED_PUBLISHED,
            Envelope::new(
                topics::FEED_PUBLISHED,
                json!({"feed_id": feed.id, "round_id": round_id, "price": aggregate_value}),
            ),
        );
        Ok(())
    }
}

/// Message a round signature covers.
pub fn round_message(feed: &FeedId, round_id: u64, price: i64, timestamp: DateTime<Utc>) -> Vec<u8> {
    let mut message = feed.as_str().as_bytes().to_vec();
    message.extend_from_slice(&round_id.to_be_bytes());
    message.extend_from_slice(&price.to_be_bytes());
    message.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
    message
}

/// Relative deviation in parts per million. A zero baseline counts as
/// infinitely deviated so the first real value always publishes.
fn deviation_ppm(last: i64, new: i64) -> u64 {
    if last == 0 {
        return u64::MAX;
    }
    let delta = (new as i128 - last as i128).unsigned_abs();
    (delta * 1_000_000 / (last as i128).unsigned_abs()) as u64
}

/// Collapses a quote set into one value.
fn aggregate(aggregation: Aggregation, mut values: Vec<i64>) -> i64 {
    values.sort_unstable();
    match aggregation {
        Aggregation::Median => {
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2
            } else {
                values[mid]
            }
        }
        Aggregation::Mean => {
            let sum: i128 = values.iter().map(|v| *v as i128).sum();
            (sum / values.len() as i128) as i64
        }
        Aggregation::Min => values[0],
        Aggregation::Max => values[values.len() - 1],
    }
}

#[async_trait]
impl Module for FeedService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        let inner = self.inner.clone();
        let token = self.base.worker_token();
        let interval = inner.config.refresh_interval;

        self.spawner.build_task().name("feed-refresh").spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => inner.refresh_pass(Utc::now()).await,
                }
            }
        });

        let storage = self.inner.storage.clone();
        spawn_account_cascade(
            &self.inner.events,
            &self.spawner,
            self.base.worker_token(),
            "feed-cascade",
            move |tenant, account| {
                let storage = storage.clone();
                async move {
                    if let Err(err) = storage.delete_account_feeds(&tenant, &account).await {
                        warn!(target: LOG_TARGET, %err, "Cascade delete failed.");
                    }
                }
            },
        );

        self.base.mark_started();
        Ok(())
    }

    async fn ready(&self) -> bool {
        self.base.is_running()
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        self.base.mark_stopped();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use strato_bus::Bus;
    use strato_primitives::Role;
    use strato_provider::providers::InMemoryProvider;
    use strato_tasks::TaskManager;

    use super::*;

    struct StaticFetcher {
        quotes: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl PriceFetcher for StaticFetcher {
        async fn quotes(&self, _pair: &str) -> Result<Vec<i64>, FetchError> {
            Ok(self.quotes.lock().unwrap().clone())
        }
    }

    fn caller() -> CallerContext {
        CallerContext::new("t", "tester", Role::User)
    }

    struct Fixture {
        service: FeedService,
        quotes: Arc<StaticFetcher>,
        account: AccountId,
    }

    fn fixture(quotes: Vec<i64>) -> Fixture {
        let fetcher = Arc::new(StaticFetcher { quotes: Mutex::new(quotes) });
        let service = FeedService::new(
            Arc::new(InMemoryProvider::new()),
            fetcher.clone(),
            Arc::new(SigningPair::from_bytes([2u8; 32])),
            Bus::new().events().clone(),
            TaskManager::current().task_spawner(),
            FeedConfig::default(),
        );
        Fixture { service, quotes: fetcher, account: AccountId::new("acct") }
    }

    fn spec(signers: Vec<String>, threshold: u32) -> FeedSpec {
        FeedSpec {
            pair: "NEO/USD".into(),
            decimals: 8,
            heartbeat_secs: 3_600,
            threshold_ppm: 10_000, // 1%
            aggregation: Aggregation::Median,
            signer_set: signers,
            threshold,
        }
    }

    #[tokio::test]
    async fn first_refresh_always_publishes() {
        let fx = fixture(vec![100, 102, 104]);
        let feed = fx.service.create_feed(&caller(), &fx.account, spec(vec![], 0)).await.unwrap();

        fx.service.run_refresh_at(Utc::now()).await;

        let stored = fx.service.get(&caller(), &fx.account, &feed.id).await.unwrap();
        assert_eq!(stored.last_round_id, 1);
        assert_eq!(stored.last_value, Some(102));
    }

    #[tokio::test]
    async fn small_moves_hold_until_the_heartbeat() {
        let fx = fixture(vec![100_000]);
        let feed = fx.service.create_feed(&caller(), &fx.account, spec(vec![], 0)).await.unwrap();

        let t0 = Utc::now();
        fx.service.run_refresh_at(t0).await;

        // 0.5% move: below the 1% deviation threshold.
        *fx.quotes.quotes.lock().unwrap() = vec![100_500];
        fx.service.run_refresh_at(t0 + chrono::Duration::seconds(60)).await;
        let held = fx.service.get(&caller(), &fx.account, &feed.id).await.unwrap();
        assert_eq!(held.last_round_id, 1);

        // Same value, but the heartbeat has elapsed.
        fx.service.run_refresh_at(t0 + chrono::Duration::seconds(3_700)).await;
        let beat = fx.service.get(&caller(), &fx.account, &feed.id).await.unwrap();
        assert_eq!(beat.last_round_id, 2);
        assert_eq!(beat.last_value, Some(100_500));
    }

    #[tokio::test]
    async fn large_deviation_publishes_immediately() {
        let fx = fixture(vec![100_000]);
        let feed = fx.service.create_feed(&caller(), &fx.account, spec(vec![], 0)).await.unwrap();

        let t0 = Utc::now();
        fx.service.run_refresh_at(t0).await;

        // 2% move: above threshold.
        *fx.quotes.quotes.lock().unwrap() = vec![102_000];
        fx.service.run_refresh_at(t0 + chrono::Duration::seconds(30)).await;

        let stored = fx.service.get(&caller(), &fx.account, &feed.id).await.unwrap();
        assert_eq!(stored.last_round_id, 2);
        assert_eq!(stored.last_value, Some(102_000));
    }

    #[tokio::test]
    async fn quorum_accepts_and_aggregates_submissions() {
        let alice = SigningPair::from_bytes([10u8; 32]);
        let bob = SigningPair::from_bytes([11u8; 32]);
        let fx = fixture(vec![]);
        let feed = fx
            .service
            .create_feed(
                &caller(),
                &fx.account,
                spec(vec![alice.public_key_hex(), bob.public_key_hex()], 2),
            )
            .await
            .unwrap();

        let timestamp = Utc::now();
        let submit = |pair: &SigningPair, price: i64| Submission {
            round_id: 1,
            price,
            signer: pair.public_key_hex(),
            signature: pair.sign_hex(&round_message(&feed.id, 1, price, timestamp)),
            timestamp,
        };

        // One valid signer is not enough.
        let first = fx
            .service
            .submit_update(&caller(), &feed.id, submit(&alice, 100_000))
            .await
            .unwrap();
        assert_eq!(first.status, UpdateStatus::Pending);
        let mid = fx.service.get(&caller(), &fx.account, &feed.id).await.unwrap();
        assert_eq!(mid.last_round_id, 0);

        // The second distinct signer completes the quorum; both values sit
        // within the aggregation window.
        let second = fx
            .service
            .submit_update(&caller(), &feed.id, submit(&bob, 100_100))
            .await
            .unwrap();
        assert_eq!(second.status, UpdateStatus::Accepted);

        let accepted = fx.service.get(&caller(), &fx.account, &feed.id).await.unwrap();
        assert_eq!(accepted.last_round_id, 1);
        assert_eq!(accepted.last_value, Some(100_050));
    }

    #[tokio::test]
    async fn unknown_signer_is_rejected() {
        let alice = SigningPair::from_bytes([10u8; 32]);
        let mallory = SigningPair::from_bytes([66u8; 32]);
        let fx = fixture(vec![]);
        let feed = fx
            .service
            .create_feed(&caller(), &fx.account, spec(vec![alice.public_key_hex()], 1))
            .await
            .unwrap();

        let timestamp = Utc::now();
        let submission = Submission {
            round_id: 1,
            price: 100,
            signer: mallory.public_key_hex(),
            signature: mallory.sign_hex(&round_message(&feed.id, 1, 100, timestamp)),
            timestamp,
        };

        let update = fx.service.submit_update(&caller(), &feed.id, submission).await.unwrap();
        assert_eq!(update.status, UpdateStatus::Rejected);
        assert_eq!(update.error.as_deref(), Some("unknown_signer"));
    }

    #[tokio::test]
    async fn stale_rounds_are_rejected() {
        let alice = SigningPair::from_bytes([10u8; 32]);
        let fx = fixture(vec![]);
        let feed = fx
            .service
            .create_feed(&caller(), &fx.account, spec(vec![alice.public_key_hex()], 1))
            .await
            .unwrap();

        let timestamp = Utc::now();
        let submit = |round_id: u64| Submission {
            round_id,
            price: 100,
            signer: alice.public_key_hex(),
            signature: alice.sign_hex(&round_message(&feed.id, round_id, 100, timestamp)),
            timestamp,
        };

        let first = fx.service.submit_update(&caller(), &feed.id, submit(1)).await.unwrap();
        assert_eq!(first.status, UpdateStatus::Accepted);

        // Round 1 again: not newer than the head.
        let replay = fx.service.submit_update(&caller(), &feed.id, submit(1)).await.unwrap();
        assert_eq!(replay.status, UpdateStatus::Rejected);
        assert_eq!(replay.error.as_deref(), Some("stale_round"));
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let alice = SigningPair::from_bytes([10u8; 32]);
        let fx = fixture(vec![]);
        let feed = fx
            .service
            .create_feed(&caller(), &fx.account, spec(vec![alice.public_key_hex()], 1))
            .await
            .unwrap();

        let timestamp = Utc::now();
        let submission = Submission {
            round_id: 1,
            price: 100,
            signer: alice.public_key_hex(),
            // Signed over a different price.
            signature: alice.sign_hex(&round_message(&feed.id, 1, 999, timestamp)),
            timestamp,
        };

        let update = fx.service.submit_update(&caller(), &feed.id, submission).await.unwrap();
        assert_eq!(update.status, UpdateStatus::Rejected);
        assert_eq!(update.error.as_deref(), Some("invalid_signature"));
    }

    #[test]
    fn aggregations() {
        assert_eq!(aggregate(Aggregation::Median, vec![3, 1, 2]), 2);
        assert_eq!(aggregate(Aggregation::Median, vec![4, 1, 2, 3]), 2);
        assert_eq!(aggregate(Aggregation::Mean, vec![1, 2, 3, 4]), 2);
        assert_eq!(aggregate(Aggregation::Min, vec![3, 1, 2]), 1);
        assert_eq!(aggregate(Aggregation::Max, vec![3, 1, 2]), 3);
    }

    #[test]
    fn deviation_math() {
        assert_eq!(deviation_ppm(100_000, 101_000), 10_000);
        assert_eq!(deviation_ppm(100_000, 99_000), 10_000);
        assert_eq!(deviation_ppm(0, 1), u64::MAX);
    }
}
