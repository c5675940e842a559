//! Refresh task: pulls keys from the backing store into the cache.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use gatesync_core::{ApiKey, RefreshWindow, now_utc};
use gatesync_storage::{
    ApiKeyCriteria, ApiKeyRepository, SubscriptionCriteria, SubscriptionRepository,
};

use crate::cache::{ApiKeyCache, CachedApiKey};
use crate::error::{Result, SyncError};

/// What a refresh task covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    /// Current state of every live key, no time bound. Used on deploy.
    Full,
    /// Keys modified within the window, revoked ones included. Used by ticks.
    Incremental(RefreshWindow),
}

impl fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshScope::Full => f.write_str("full"),
            RefreshScope::Incremental(window) => write!(f, "incremental {window}"),
        }
    }
}

/// One unit of work for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTask {
    pub scope: RefreshScope,
    pub plans: BTreeSet<String>,
}

impl RefreshTask {
    pub fn full<I, S>(plans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: RefreshScope::Full,
            plans: plans.into_iter().map(Into::into).collect(),
        }
    }

    pub fn incremental<I, S>(plans: I, window: RefreshWindow) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: RefreshScope::Incremental(window),
            plans: plans.into_iter().map(Into::into).collect(),
        }
    }

    pub fn criteria(&self) -> ApiKeyCriteria {
        match self.scope {
            RefreshScope::Full => ApiKeyCriteria::full(self.plans.iter().cloned()),
            RefreshScope::Incremental(window) => {
                ApiKeyCriteria::incremental(self.plans.iter().cloned(), window)
            }
        }
    }
}

/// Outcome of one refresh task. Failures are values, never panics.
#[derive(Debug)]
pub struct RefreshResult {
    pub keys_refreshed: usize,
    pub cause: Option<SyncError>,
}

impl RefreshResult {
    pub fn success(keys_refreshed: usize) -> Self {
        Self {
            keys_refreshed,
            cause: None,
        }
    }

    pub fn failure(cause: SyncError) -> Self {
        Self {
            keys_refreshed: 0,
            cause: Some(cause),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.cause.is_none()
    }

    pub fn failed(&self) -> bool {
        self.cause.is_some()
    }
}

/// Runs refresh tasks against the backing store and the cache.
#[derive(Clone)]
pub struct ApiKeyRefresher {
    api_keys: Arc<dyn ApiKeyRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    cache: Arc<dyn ApiKeyCache>,
}

impl ApiKeyRefresher {
    pub fn new(
        api_keys: Arc<dyn ApiKeyRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        cache: Arc<dyn ApiKeyCache>,
    ) -> Self {
        Self {
            api_keys,
            subscriptions,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<dyn ApiKeyCache> {
        &self.cache
    }

    pub async fn run(&self, task: &RefreshTask) -> RefreshResult {
        match self.try_run(task).await {
            Ok(count) => {
                tracing::debug!(scope = %task.scope, plans = task.plans.len(), keys = count, "refresh task done");
                RefreshResult::success(count)
            }
            Err(e) => {
                tracing::warn!(scope = %task.scope, plans = task.plans.len(), error = %e, "refresh task failed");
                RefreshResult::failure(e)
            }
        }
    }

    async fn try_run(&self, task: &RefreshTask) -> Result<usize> {
        if task.plans.is_empty() {
            return Ok(0);
        }

        let mut keys = self.api_keys.find_by_criteria(&task.criteria()).await?;
        if let RefreshScope::Incremental(window) = task.scope {
            let rejoined = self.keys_of_modified_subscriptions(task, window, &keys).await?;
            keys.extend(rejoined);
        }
        if keys.is_empty() {
            return Ok(0);
        }

        let subscription_ids: Vec<String> = keys
            .iter()
            .map(|key| key.subscription.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let subscriptions: HashMap<String, _> = self
            .subscriptions
            .find_by_ids(&subscription_ids)
            .await?
            .into_iter()
            .map(|subscription| (subscription.id.clone(), subscription))
            .collect();

        let refreshed_at = now_utc();
        let mut count = 0;
        for key in keys {
            let subscription = subscriptions.get(&key.subscription).cloned();
            if subscription.is_none() {
                tracing::debug!(plan = %key.plan, subscription = %key.subscription, "subscription not found for api key");
            }
            match self
                .cache
                .upsert(CachedApiKey::new(key, subscription, refreshed_at))
                .await
            {
                Ok(()) => count += 1,
                Err(e) if !e.is_transient() => {
                    tracing::warn!(error = %e, "api key skipped by cache");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(count)
    }

    /// Keys whose subscription changed within `window` but which were not
    /// themselves modified, so the cache sees the new subscription state.
    async fn keys_of_modified_subscriptions(
        &self,
        task: &RefreshTask,
        window: RefreshWindow,
        already_selected: &[ApiKey],
    ) -> Result<Vec<ApiKey>> {
        let criteria = SubscriptionCriteria::incremental(task.plans.iter().cloned(), window);
        let modified = self.subscriptions.find_modified(&criteria).await?;
        if modified.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = modified.into_iter().map(|subscription| subscription.id).collect();
        let selected: HashSet<&str> = already_selected.iter().map(|key| key.key.as_str()).collect();
        let keys = self
            .api_keys
            .find_by_subscriptions(&ids)
            .await?
            .into_iter()
            .filter(|key| task.plans.contains(&key.plan) && !selected.contains(key.key.as_str()))
            .collect::<Vec<_>>();

        tracing::debug!(subscriptions = ids.len(), keys = keys.len(), "rejoining keys of modified subscriptions");
        Ok(keys)
    }
}

impl fmt::Debug for ApiKeyRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRefresher")
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalApiKeyCache;
    use gatesync_core::{Subscription, SubscriptionStatus, Watermark};
    use gatesync_storage::InMemoryRepository;
    use time::macros::datetime;

    fn key(key: &str, plan: &str, revoked: bool) -> ApiKey {
        ApiKey {
            key: key.into(),
            api: "api-1".into(),
            plan: plan.into(),
            subscription: format!("sub-{key}"),
            application: "app-1".into(),
            revoked,
            paused: false,
            expire_at: None,
            updated_at: datetime!(2024-01-01 10:00 UTC),
        }
    }

    fn subscription(id: &str) -> Subscription {
        Subscription {
            id: id.into(),
            api: "api-1".into(),
            plan: "p1".into(),
            application: "app-1".into(),
            status: SubscriptionStatus::Accepted,
            ending_at: None,
            updated_at: datetime!(2024-01-01 10:00 UTC),
        }
    }

    fn setup() -> (Arc<InMemoryRepository>, Arc<LocalApiKeyCache>, ApiKeyRefresher) {
        let repo = Arc::new(InMemoryRepository::new());
        let cache = LocalApiKeyCache::new_shared();
        let refresher = ApiKeyRefresher::new(repo.clone(), repo.clone(), cache.clone());
        (repo, cache, refresher)
    }

    #[tokio::test]
    async fn test_full_refresh_joins_subscriptions() {
        let (repo, cache, refresher) = setup();
        repo.put_api_key(key("k1", "p1", false));
        repo.put_api_key(key("k2", "p1", true));
        repo.put_subscription(subscription("sub-k1"));

        let result = refresher.run(&RefreshTask::full(["p1"])).await;
        assert!(result.succeeded());
        assert_eq!(result.keys_refreshed, 1);

        let cached = cache.peek("k1").unwrap();
        assert_eq!(cached.subscription.as_ref().unwrap().id, "sub-k1");
        assert!(!cache.contains("k2"));
    }

    #[tokio::test]
    async fn test_incremental_refresh_propagates_revocation() {
        let (repo, cache, refresher) = setup();
        repo.put_api_key(key("k1", "p1", true));

        let window = RefreshWindow::new(Watermark::Never, datetime!(2024-01-02 0:00 UTC));
        let result = refresher.run(&RefreshTask::incremental(["p1"], window)).await;

        assert!(result.succeeded());
        let cached = cache.peek("k1").unwrap();
        assert!(cached.api_key.revoked);
        assert!(cached.subscription.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_a_value() {
        let (repo, cache, refresher) = setup();
        repo.put_api_key(key("k1", "p1", false));
        repo.set_unavailable(true);

        let result = refresher.run(&RefreshTask::full(["p1"])).await;
        assert!(result.failed());
        assert!(matches!(result.cause, Some(SyncError::Storage(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_key_is_skipped() {
        let (repo, cache, refresher) = setup();
        repo.put_api_key(key("", "p1", false));
        repo.put_api_key(key("k1", "p1", false));

        let result = refresher.run(&RefreshTask::full(["p1"])).await;

        assert!(result.succeeded());
        assert_eq!(result.keys_refreshed, 1);
        assert!(cache.contains("k1"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_incremental_refresh_rejoins_modified_subscription() {
        let (repo, cache, refresher) = setup();
        repo.put_api_key(key("k1", "p1", false));
        repo.put_subscription(subscription("sub-k1"));
        refresher.run(&RefreshTask::full(["p1"])).await;

        repo.put_subscription(Subscription {
            status: SubscriptionStatus::Paused,
            updated_at: datetime!(2024-01-02 10:00 UTC),
            ..subscription("sub-k1")
        });
        let window = RefreshWindow::new(
            Watermark::At(datetime!(2024-01-02 0:00 UTC)),
            datetime!(2024-01-03 0:00 UTC),
        );
        let result = refresher.run(&RefreshTask::incremental(["p1"], window)).await;

        assert!(result.succeeded());
        assert_eq!(result.keys_refreshed, 1);
        let cached = cache.peek("k1").unwrap();
        assert_eq!(cached.subscription.as_ref().unwrap().status, SubscriptionStatus::Paused);
        assert!(!cached.is_valid_at(datetime!(2024-01-03 0:00 UTC)));
    }

    #[tokio::test]
    async fn test_empty_plan_set_skips_store() {
        let (repo, _cache, refresher) = setup();
        let result = refresher.run(&RefreshTask::full(Vec::<String>::new())).await;
        assert!(result.succeeded());
        assert_eq!(repo.total_queries(), 0);
    }
}
