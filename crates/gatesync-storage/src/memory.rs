//! In-memory backing store.
//!
//! Implements both repository traits over `DashMap`s. Used by the node
//! binary when running from a fixture file and by tests, which rely on the
//! call counters and on the failure injection switches.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use gatesync_core::{Api, ApiKey, Subscription};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ApiKeyCriteria, ApiKeyRepository, SubscriptionCriteria, SubscriptionRepository,
};

/// Seed data for the in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreFixture {
    #[serde(default)]
    pub apis: Vec<Api>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

impl StoreFixture {
    /// Reads a JSON fixture file.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// In-memory repository for API keys and subscriptions.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    api_keys: DashMap<String, ApiKey>,
    subscriptions: DashMap<String, Subscription>,
    /// Any key query touching one of these plans fails.
    failing_plans: DashSet<String>,
    /// Key queries touching one of these plans are rejected as invalid.
    rejected_plans: DashSet<String>,
    /// Every query fails while set.
    unavailable: AtomicBool,
    /// Number of upcoming key queries that fail before the store recovers.
    failures_remaining: AtomicUsize,
    api_key_queries: AtomicU64,
    subscription_queries: AtomicU64,
    criteria_log: Mutex<Vec<ApiKeyCriteria>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: &StoreFixture) -> Self {
        let repository = Self::new();
        for subscription in &fixture.subscriptions {
            repository.put_subscription(subscription.clone());
        }
        for api_key in &fixture.api_keys {
            repository.put_api_key(api_key.clone());
        }
        repository
    }

    /// Inserts or replaces a key, keyed by its value.
    pub fn put_api_key(&self, api_key: ApiKey) {
        self.api_keys.insert(api_key.key.clone(), api_key);
    }

    pub fn put_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub fn api_key_count(&self) -> usize {
        self.api_keys.len()
    }

    /// Makes every key query that includes `plan` fail.
    pub fn fail_on_plan(&self, plan: impl Into<String>) {
        self.failing_plans.insert(plan.into());
    }

    /// Makes every key query that includes `plan` fail with a non-transient error.
    pub fn reject_plan(&self, plan: impl Into<String>) {
        self.rejected_plans.insert(plan.into());
    }

    pub fn clear_plan_failures(&self) {
        self.failing_plans.clear();
        self.rejected_plans.clear();
    }

    /// Simulates the whole store going down (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fails the next `count` key queries, then recovers.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of key queries received, failed ones included.
    pub fn api_key_queries(&self) -> u64 {
        self.api_key_queries.load(Ordering::SeqCst)
    }

    pub fn subscription_queries(&self) -> u64 {
        self.subscription_queries.load(Ordering::SeqCst)
    }

    /// Total backing-store calls of any kind.
    pub fn total_queries(&self) -> u64 {
        self.api_key_queries() + self.subscription_queries()
    }

    /// Criteria of every key query received so far, in arrival order.
    pub fn criteria_log(&self) -> Vec<ApiKeyCriteria> {
        self.criteria_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::connection_error("backing store unavailable"));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryRepository {
    async fn find_by_criteria(&self, criteria: &ApiKeyCriteria) -> StorageResult<Vec<ApiKey>> {
        self.api_key_queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.criteria_log.lock() {
            log.push(criteria.clone());
        }

        self.check_available()?;
        if self.take_injected_failure() {
            return Err(StorageError::connection_error("injected failure"));
        }
        if let Some(plan) = criteria
            .plans
            .iter()
            .find(|plan| self.failing_plans.contains(*plan))
        {
            return Err(StorageError::connection_error(format!(
                "query failed for plan {plan}"
            )));
        }
        if let Some(plan) = criteria
            .plans
            .iter()
            .find(|plan| self.rejected_plans.contains(*plan))
        {
            return Err(StorageError::invalid_criteria(format!(
                "plan {plan} rejected"
            )));
        }

        let keys: Vec<ApiKey> = self
            .api_keys
            .iter()
            .filter(|entry| criteria.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        tracing::trace!(
            plans = criteria.plans.len(),
            matched = keys.len(),
            "in-memory api key query"
        );
        Ok(keys)
    }

    async fn find_by_subscriptions(&self, subscription_ids: &[String]) -> StorageResult<Vec<ApiKey>> {
        self.api_key_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        Ok(self
            .api_keys
            .iter()
            .filter(|entry| subscription_ids.contains(&entry.value().subscription))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryRepository {
    async fn find_by_ids(&self, ids: &[String]) -> StorageResult<Vec<Subscription>> {
        self.subscription_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        Ok(ids
            .iter()
            .filter_map(|id| self.subscriptions.get(id).map(|s| s.value().clone()))
            .collect())
    }

    async fn find_modified(&self, criteria: &SubscriptionCriteria) -> StorageResult<Vec<Subscription>> {
        self.subscription_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        Ok(self
            .subscriptions
            .iter()
            .filter(|entry| criteria.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
