//! Error types for the synchronization engine.

use std::time::Duration;

use gatesync_storage::StorageError;
use thiserror::Error;

use crate::cache::CacheError;
use crate::cluster::ClusterError;

/// Errors produced while refreshing the key cache or driving the scheduler.
///
/// Refresh failures never cross the worker-pool boundary as panics: they are
/// carried inside a [`RefreshResult`](crate::refresher::RefreshResult).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Refresh task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Refresh task panicked: {0}")]
    Panicked(String),

    #[error("Refresh task aborted: {0}")]
    Aborted(String),

    #[error("Invalid sync configuration: {0}")]
    Config(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether a later attempt may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Cache(e) => e.is_transient(),
            Self::Cluster(_) | Self::Timeout(_) => true,
            Self::Panicked(_) | Self::Aborted(_) | Self::Config(_) | Self::AlreadyRunning => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
