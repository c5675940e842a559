//! Lifecycle event types emitted by the gateway reactor.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::Api;

/// Kind of API lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventKind {
    /// API was deployed on this node
    Deploy,
    /// API was removed from this node
    Undeploy,
    /// API definition changed
    Update,
}

impl LifecycleEventKind {
    /// Returns the string representation of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::Deploy => "deploy",
            LifecycleEventKind::Undeploy => "undeploy",
            LifecycleEventKind::Update => "update",
        }
    }
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event carrying one API descriptor through a lifecycle change.
///
/// Delivery is at-least-once with no global ordering; consumers must be
/// idempotent under redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub api: Api,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, api: Api) -> Self {
        Self {
            kind,
            api,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn deploy(api: Api) -> Self {
        Self::new(LifecycleEventKind::Deploy, api)
    }

    pub fn undeploy(api: Api) -> Self {
        Self::new(LifecycleEventKind::Undeploy, api)
    }

    pub fn update(api: Api) -> Self {
        Self::new(LifecycleEventKind::Update, api)
    }

    pub fn api_id(&self) -> &str {
        &self.api.id
    }
}
