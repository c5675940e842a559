//! Registry of the API-key plans the engine keeps in sync.
//!
//! Maps an API id to the ids of its plans secured by an API key. An API
//! without such plans (or a disabled one) never has an entry.

use std::collections::{BTreeSet, HashMap};

use dashmap::DashMap;
use gatesync_core::Api;

/// Plan sets computed from a batch of API descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSelection {
    /// APIs with at least one API-key plan.
    pub entries: HashMap<String, BTreeSet<String>>,
    /// APIs that must have no entry: disabled, or without API-key plans.
    pub dropped: Vec<String>,
}

impl PlanSelection {
    pub fn from_apis(apis: &[Api]) -> Self {
        let mut selection = Self::default();
        for api in apis {
            let plans: BTreeSet<String> = api.api_key_plans().map(str::to_string).collect();
            if plans.is_empty() {
                selection.entries.remove(&api.id);
                selection.dropped.push(api.id.clone());
            } else {
                selection.dropped.retain(|id| id != &api.id);
                selection.entries.insert(api.id.clone(), plans);
            }
        }
        selection
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// De-duplicated union of the selected plan ids.
    pub fn plan_ids(&self) -> BTreeSet<String> {
        self.entries.values().flatten().cloned().collect()
    }
}

/// Concurrent `api_id -> plan ids` map.
#[derive(Debug, Default)]
pub struct PlanRegistry {
    entries: DashMap<String, BTreeSet<String>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the API-key plan subsets of `apis` without touching the registry.
    pub fn select(&self, apis: &[Api]) -> PlanSelection {
        PlanSelection::from_apis(apis)
    }

    /// Stores the API-key plan subset of every API in `apis` and returns the
    /// non-empty subsets. APIs whose subset is empty are left without an entry.
    pub fn register(&self, apis: &[Api]) -> HashMap<String, BTreeSet<String>> {
        let selection = self.select(apis);
        for api_id in &selection.dropped {
            self.entries.remove(api_id);
        }
        self.merge(&selection.entries);
        selection.entries
    }

    /// Overwrites the entries for the given APIs. Empty plan sets are ignored.
    pub fn merge(&self, entries: &HashMap<String, BTreeSet<String>>) {
        for (api_id, plans) in entries {
            if plans.is_empty() {
                continue;
            }
            self.entries.insert(api_id.clone(), plans.clone());
        }
    }

    /// Overwrites the entry of one API. An empty plan set is ignored.
    pub fn insert(&self, api_id: &str, plans: BTreeSet<String>) {
        if !plans.is_empty() {
            self.entries.insert(api_id.to_string(), plans);
        }
    }

    /// Removes the entry of `api_id`. Returns whether one existed.
    pub fn unregister(&self, api_id: &str) -> bool {
        self.entries.remove(api_id).is_some()
    }

    pub fn contains(&self, api_id: &str) -> bool {
        self.entries.contains_key(api_id)
    }

    pub fn plans_for(&self, api_id: &str) -> Option<BTreeSet<String>> {
        self.entries.get(api_id).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of the registry.
    pub fn snapshot(&self) -> HashMap<String, BTreeSet<String>> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Sorted, de-duplicated union of every registered plan id.
    pub fn tracked_plans(&self) -> Vec<String> {
        let plans: BTreeSet<String> = self
            .entries
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        plans.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
