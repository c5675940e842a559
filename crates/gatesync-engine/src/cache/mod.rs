//! API key cache consumed by the gateway request path.
//!
//! The engine only ever writes to the cache through [`ApiKeyCache::upsert`];
//! revoked, paused or expired keys are stored with their attributes so the
//! request path can reject them. Nothing is ever deleted by a refresh.

mod local;

use std::sync::Arc;

use async_trait::async_trait;
use gatesync_core::{ApiKey, Subscription};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

pub use local::LocalApiKeyCache;

/// Errors raised by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {message}")]
    Unavailable { message: String },

    #[error("Cache rejected entry '{key}': {message}")]
    Rejected { key: String, message: String },
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// One cached key, joined with its subscription when the store had it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedApiKey {
    pub api_key: ApiKey,
    pub subscription: Option<Subscription>,
    #[serde(with = "time::serde::rfc3339")]
    pub refreshed_at: OffsetDateTime,
}

impl CachedApiKey {
    pub fn new(api_key: ApiKey, subscription: Option<Subscription>, refreshed_at: OffsetDateTime) -> Self {
        Self {
            api_key,
            subscription,
            refreshed_at,
        }
    }

    pub fn key(&self) -> &str {
        &self.api_key.key
    }

    /// Whether a request presenting this key should be let through at `now`.
    ///
    /// A key whose subscription is unknown is never valid.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.api_key.is_active_at(now)
            && self
                .subscription
                .as_ref()
                .is_some_and(|subscription| subscription.is_active_at(now))
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Number of upserts applied since startup, replacements included.
    pub upserts: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Key cache abstraction.
///
/// Implementations must be safe for concurrent upserts from several refresh
/// tasks; entries are keyed by the key value and the last write wins.
#[async_trait]
pub trait ApiKeyCache: Send + Sync {
    /// Looks up a key by its value.
    async fn get(&self, key: &str) -> Option<Arc<CachedApiKey>>;

    /// Inserts or replaces the entry for `entry.key()`.
    async fn upsert(&self, entry: CachedApiKey) -> Result<(), CacheError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CacheStats;

    /// Copy of every cached entry, sorted by key value.
    fn entries(&self) -> Vec<Arc<CachedApiKey>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatesync_core::SubscriptionStatus;
    use time::macros::datetime;

    fn entry(revoked: bool, status: Option<SubscriptionStatus>) -> CachedApiKey {
        let now = datetime!(2024-05-01 12:00 UTC);
        CachedApiKey::new(
            ApiKey {
                key: "k1".into(),
                api: "api-1".into(),
                plan: "p1".into(),
                subscription: "s1".into(),
                application: "app-1".into(),
                revoked,
                paused: false,
                expire_at: None,
                updated_at: now,
            },
            status.map(|status| Subscription {
                id: "s1".into(),
                api: "api-1".into(),
                plan: "p1".into(),
                application: "app-1".into(),
                status,
                ending_at: None,
                updated_at: now,
            }),
            now,
        )
    }

    #[test]
    fn test_validity() {
        let now = datetime!(2024-05-01 12:00 UTC);
        assert!(entry(false, Some(SubscriptionStatus::Accepted)).is_valid_at(now));
        assert!(!entry(true, Some(SubscriptionStatus::Accepted)).is_valid_at(now));
        assert!(!entry(false, Some(SubscriptionStatus::Closed)).is_valid_at(now));
        assert!(!entry(false, None).is_valid_at(now));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            size: 1,
            hits: 3,
            misses: 1,
            upserts: 1,
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_error_classification() {
        assert!(CacheError::unavailable("down").is_transient());
        assert!(!CacheError::rejected("k1", "too large").is_transient());
    }
}
