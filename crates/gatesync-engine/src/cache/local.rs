use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ApiKeyCache, CacheError, CacheStats, CachedApiKey};

/// In-process key cache backed by a `DashMap`.
///
/// Entries have no TTL: a key stays cached until a later refresh replaces it.
#[derive(Debug, Default)]
pub struct LocalApiKeyCache {
    entries: DashMap<String, Arc<CachedApiKey>>,
    hits: AtomicU64,
    misses: AtomicU64,
    upserts: AtomicU64,
}

impl LocalApiKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Synchronous lookup that leaves the hit/miss counters alone.
    pub fn peek(&self, key: &str) -> Option<Arc<CachedApiKey>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl ApiKeyCache for LocalApiKeyCache {
    async fn get(&self, key: &str) -> Option<Arc<CachedApiKey>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn upsert(&self, entry: CachedApiKey) -> Result<(), CacheError> {
        if entry.key().is_empty() {
            return Err(CacheError::rejected("", "empty key value"));
        }
        self.entries.insert(entry.key().to_string(), Arc::new(entry));
        self.upserts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
        }
    }

    fn entries(&self) -> Vec<Arc<CachedApiKey>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatesync_core::ApiKey;
    use time::macros::datetime;

    fn cached(key: &str, revoked: bool) -> CachedApiKey {
        CachedApiKey::new(
            ApiKey {
                key: key.into(),
                api: "api-1".into(),
                plan: "p1".into(),
                subscription: "s1".into(),
                application: "app-1".into(),
                revoked,
                paused: false,
                expire_at: None,
                updated_at: datetime!(2024-01-01 0:00 UTC),
            },
            None,
            datetime!(2024-01-01 0:00 UTC),
        )
    }

    #[tokio::test]
    async fn test_get_counts_hits_and_misses() {
        let cache = LocalApiKeyCache::new();
        cache.upsert(cached("k1", false)).await.unwrap();

        assert!(cache.get("k1").await.is_some());
        assert!(cache.get("missing").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.upserts, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let cache = LocalApiKeyCache::new();
        cache.upsert(cached("k1", false)).await.unwrap();
        cache.upsert(cached("k1", true)).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.peek("k1").unwrap().api_key.revoked);
        assert_eq!(cache.stats().upserts, 2);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let cache = LocalApiKeyCache::new();
        let err = cache.upsert(cached("", false)).await.unwrap_err();
        assert!(matches!(err, CacheError::Rejected { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_entries_sorted() {
        let cache = LocalApiKeyCache::new();
        cache.upsert(cached("k2", false)).await.unwrap();
        cache.upsert(cached("k1", false)).await.unwrap();
        let keys: Vec<_> = cache.entries().iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
    }
}
