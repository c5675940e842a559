//! API key cache service.
//!
//! Wires the registry, the orchestrator, the scheduler and the registration
//! controller together and owns the background tasks: the periodic lane,
//! the lifecycle event listener and the full-refresh retry worker.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use gatesync_core::{EventBroadcaster, Watermark};
use gatesync_storage::{ApiKeyRepository, SubscriptionRepository};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{ApiKeyCache, CacheStats};
use crate::cluster::{ClusterManager, MastershipGate};
use crate::config::SyncConfig;
use crate::controller::RegistrationController;
use crate::error::{Result, SyncError};
use crate::orchestrator::{Clock, CycleOutcome, CycleReport, RefreshOrchestrator};
use crate::pool::WorkerPool;
use crate::refresher::ApiKeyRefresher;
use crate::registry::PlanRegistry;
use crate::scheduler::{SchedulerState, SyncScheduler};

/// External collaborators of the service.
#[derive(Clone)]
pub struct SyncDependencies {
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub cache: Arc<dyn ApiKeyCache>,
    pub cluster: Arc<dyn ClusterManager>,
    pub events: EventBroadcaster,
}

/// Point-in-time view of the service, served by the diagnostics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncDiagnostics {
    pub state: SchedulerState,
    pub distributed: bool,
    pub bulk_items: usize,
    pub registered_apis: BTreeMap<String, BTreeSet<String>>,
    pub tracked_plans: Vec<String>,
    pub watermark: Watermark,
    pub last_cycle: Option<CycleReport>,
    pub pending_full_refreshes: usize,
    pub cache: CacheStats,
}

struct Background {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct ApiKeysCacheService {
    config: SyncConfig,
    registry: Arc<PlanRegistry>,
    cache: Arc<dyn ApiKeyCache>,
    events: EventBroadcaster,
    controller: Arc<RegistrationController>,
    scheduler: SyncScheduler,
    watermark_rx: watch::Receiver<Watermark>,
    report_rx: watch::Receiver<Option<CycleReport>>,
    background: Mutex<Option<Background>>,
}

impl ApiKeysCacheService {
    pub fn new(config: SyncConfig, deps: SyncDependencies) -> Result<Self> {
        Self::build(config, deps, None)
    }

    /// Same as [`new`](Self::new) with a custom clock for window boundaries.
    pub fn with_clock(config: SyncConfig, deps: SyncDependencies, clock: Clock) -> Result<Self> {
        Self::build(config, deps, Some(clock))
    }

    fn build(config: SyncConfig, deps: SyncDependencies, clock: Option<Clock>) -> Result<Self> {
        config.validate().map_err(SyncError::Config)?;

        let registry = Arc::new(PlanRegistry::new());
        let refresher = ApiKeyRefresher::new(deps.api_keys, deps.subscriptions, Arc::clone(&deps.cache));
        let pool = WorkerPool::new(config.worker_threads, config.task_timeout());
        let gate = MastershipGate::new(deps.cluster, config.distributed);

        let mut orchestrator = RefreshOrchestrator::new(
            Arc::clone(&registry),
            refresher.clone(),
            pool.clone(),
            gate.clone(),
            config.bulk_items,
        );
        if let Some(clock) = clock {
            orchestrator = orchestrator.with_clock(clock);
        }
        let watermark_rx = orchestrator.subscribe_watermark();
        let report_rx = orchestrator.subscribe_reports();

        let controller = Arc::new(RegistrationController::new(
            Arc::clone(&registry),
            refresher,
            pool,
            gate,
            config.retry.clone(),
        ));

        Ok(Self {
            config,
            registry,
            cache: deps.cache,
            events: deps.events,
            controller,
            scheduler: SyncScheduler::new(orchestrator),
            watermark_rx,
            report_rx,
            background: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PlanRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ApiKeyCache> {
        &self.cache
    }

    pub fn controller(&self) -> &Arc<RegistrationController> {
        &self.controller
    }

    pub fn watermark(&self) -> Watermark {
        *self.watermark_rx.borrow()
    }

    pub fn subscribe_watermark(&self) -> watch::Receiver<Watermark> {
        self.watermark_rx.clone()
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.report_rx.borrow().clone()
    }

    pub async fn state(&self) -> SchedulerState {
        self.scheduler.state().await
    }

    /// Starts with the configured period.
    pub async fn start(&self) -> Result<()> {
        self.start_with_period(self.config.period()).await
    }

    /// Starts the periodic lane, then begins listening for lifecycle events.
    pub async fn start_with_period(&self, period: Duration) -> Result<()> {
        let mut background = self.background.lock().await;
        self.scheduler.start(period).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(2);
        tasks.push(self.spawn_event_listener(shutdown_rx.clone()));
        if let Some(worker) = self.controller.start_retry_worker(shutdown_rx).await {
            tasks.push(worker);
        }

        *background = Some(Background { shutdown_tx, tasks });
        info!(
            period_ms = period.as_millis() as u64,
            bulk_items = self.config.bulk_items,
            distributed = self.config.distributed,
            "api keys cache service started"
        );
        Ok(())
    }

    /// Stops ticking and listening. An in-flight cycle completes first;
    /// full refreshes already on the pool are left to finish.
    pub async fn stop(&self) {
        self.scheduler.stop().await;

        let Some(background) = self.background.lock().await.take() else {
            return;
        };
        let _ = background.shutdown_tx.send(true);
        for task in background.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "api keys cache background task ended abnormally");
            }
        }
        info!("api keys cache service stopped");
    }

    /// Runs one incremental cycle now.
    pub async fn trigger_refresh(&self) -> Result<CycleOutcome> {
        self.scheduler.trigger_now().await
    }

    pub async fn diagnostics(&self) -> SyncDiagnostics {
        SyncDiagnostics {
            state: self.scheduler.state().await,
            distributed: self.config.distributed,
            bulk_items: self.config.bulk_items,
            registered_apis: self.registry.snapshot().into_iter().collect(),
            tracked_plans: self.registry.tracked_plans(),
            watermark: self.watermark(),
            last_cycle: self.last_cycle(),
            pending_full_refreshes: self.controller.pending_refreshes(),
            cache: self.cache.stats(),
        }
    }

    fn spawn_event_listener(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut events = self.events.subscribe();
        let controller = Arc::clone(&self.controller);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => controller.handle_event(&event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "api keys cache lagged behind lifecycle events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("lifecycle event channel closed");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ApiKeysCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeysCacheService")
            .field("config", &self.config)
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}
