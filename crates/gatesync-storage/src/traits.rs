//! Repository traits for the backing store.
//!
//! The synchronization engine only reads from the backing store: API keys by
//! plan (optionally bounded by a modification window) or by subscription, and
//! subscriptions by id or by modification window.

use std::collections::BTreeSet;

use async_trait::async_trait;
use gatesync_core::{ApiKey, RefreshWindow, Subscription, Watermark};
use time::OffsetDateTime;

use crate::error::StorageResult;

/// Criteria for a bulk API key lookup.
///
/// `from`/`to` bound `updated_at` as the half-open range `[from, to)`;
/// `None` leaves that side unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyCriteria {
    pub plans: BTreeSet<String>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub include_revoked: bool,
}

impl ApiKeyCriteria {
    /// Current state of every live key of the given plans, no time bound.
    pub fn full<I, S>(plans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plans: plans.into_iter().map(Into::into).collect(),
            from: None,
            to: None,
            include_revoked: false,
        }
    }

    /// Keys of the given plans modified within `window`, revoked ones included
    /// so revocations reach the cache.
    pub fn incremental<I, S>(plans: I, window: RefreshWindow) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let from = match window.from {
            Watermark::Never => None,
            Watermark::At(at) => Some(at),
        };
        Self {
            plans: plans.into_iter().map(Into::into).collect(),
            from,
            to: Some(window.to),
            include_revoked: true,
        }
    }

    pub fn is_time_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Whether `key` satisfies these criteria.
    pub fn matches(&self, key: &ApiKey) -> bool {
        if !self.plans.contains(&key.plan) {
            return false;
        }
        if key.revoked && !self.include_revoked {
            return false;
        }
        if let Some(from) = self.from
            && key.updated_at < from
        {
            return false;
        }
        if let Some(to) = self.to
            && key.updated_at >= to
        {
            return false;
        }
        true
    }
}

/// Criteria for a windowed subscription lookup, `[from, to)` on `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    pub plans: BTreeSet<String>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl SubscriptionCriteria {
    /// Subscriptions of the given plans modified within `window`.
    pub fn incremental<I, S>(plans: I, window: RefreshWindow) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let from = match window.from {
            Watermark::Never => None,
            Watermark::At(at) => Some(at),
        };
        Self {
            plans: plans.into_iter().map(Into::into).collect(),
            from,
            to: Some(window.to),
        }
    }

    pub fn matches(&self, subscription: &Subscription) -> bool {
        self.plans.contains(&subscription.plan)
            && self.from.is_none_or(|from| subscription.updated_at >= from)
            && self.to.is_none_or(|to| subscription.updated_at < to)
    }
}

/// Read access to API keys in the backing store.
///
/// Implementations must be thread-safe and should bound every call with a
/// client-level timeout; the engine treats a hung call as a stalled chunk.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Bulk fetch of the keys matching `criteria`.
    ///
    /// # Errors
    ///
    /// Returns an error for infrastructure issues; an empty result is not an error.
    async fn find_by_criteria(&self, criteria: &ApiKeyCriteria) -> StorageResult<Vec<ApiKey>>;

    /// Every key of the given subscriptions, revoked ones included.
    async fn find_by_subscriptions(&self, subscription_ids: &[String]) -> StorageResult<Vec<ApiKey>>;
}

/// Read access to subscriptions in the backing store.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Bulk fetch of subscriptions by id. Unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[String]) -> StorageResult<Vec<Subscription>>;

    /// Subscriptions matching `criteria`, whatever their status.
    async fn find_modified(&self, criteria: &SubscriptionCriteria) -> StorageResult<Vec<Subscription>>;
}
