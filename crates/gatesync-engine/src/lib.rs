//! API-key cache synchronization engine.
//!
//! Keeps a node-local cache of API keys in sync with the backing store:
//! deployed APIs register their API-key plans, a periodic single-lane
//! scheduler pulls incremental changes in bounded chunks, and in a
//! distributed deployment only the cluster master does the work.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod refresher;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use cache::{ApiKeyCache, CacheError, CacheStats, CachedApiKey, LocalApiKeyCache};
pub use cluster::{ClusterError, ClusterManager, MastershipGate, StandaloneCluster, StaticCluster};
pub use config::{RetryConfig, SyncConfig};
pub use controller::{RegistrationController, RetryRequest};
pub use error::{Result, SyncError};
pub use orchestrator::{Clock, CycleOutcome, CycleReport, RefreshOrchestrator, chunk_plans};
pub use pool::{PendingRefresh, WorkerPool};
pub use refresher::{ApiKeyRefresher, RefreshResult, RefreshScope, RefreshTask};
pub use registry::{PlanRegistry, PlanSelection};
pub use scheduler::{SchedulerState, SyncScheduler};
pub use service::{ApiKeysCacheService, SyncDependencies, SyncDiagnostics};
