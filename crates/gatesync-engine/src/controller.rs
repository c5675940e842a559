//! Reaction to API lifecycle events.
//!
//! A deploy computes the API-key plans of the API and launches a full
//! refresh of those plans on the worker pool; the registry entry appears
//! once the refresh succeeded, so the next incremental cycle only has to
//! cover changes. A full refresh that failed on a transient error is
//! re-queued with an exponential backoff; other failures are logged and
//! dropped. Every registration carries a generation number: an undeploy or a
//! newer registration of the same API makes older refreshes and retries
//! stale, and stale results never reach the registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use gatesync_core::{Api, LifecycleEvent, LifecycleEventKind};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cluster::MastershipGate;
use crate::config::RetryConfig;
use crate::pool::WorkerPool;
use crate::refresher::{ApiKeyRefresher, RefreshResult, RefreshTask};
use crate::registry::{PlanRegistry, PlanSelection};

/// A registration attempt for a batch of APIs.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub apis: Vec<Api>,
    /// 0 for the first attempt, incremented on each retry.
    pub attempt: u32,
    /// Generation of each API at the time it was registered.
    pub generations: HashMap<String, u64>,
}

impl RetryRequest {
    fn api_ids(&self) -> Vec<&str> {
        self.apis.iter().map(|api| api.id.as_str()).collect()
    }
}

pub struct RegistrationController {
    registry: Arc<PlanRegistry>,
    refresher: ApiKeyRefresher,
    pool: WorkerPool,
    gate: MastershipGate,
    retry: RetryConfig,
    generations: DashMap<String, u64>,
    next_generation: AtomicU64,
    retry_tx: mpsc::UnboundedSender<RetryRequest>,
    retry_rx: Mutex<Option<mpsc::UnboundedReceiver<RetryRequest>>>,
    pending: AtomicUsize,
    idle: Notify,
}

impl RegistrationController {
    pub fn new(
        registry: Arc<PlanRegistry>,
        refresher: ApiKeyRefresher,
        pool: WorkerPool,
        gate: MastershipGate,
        retry: RetryConfig,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            refresher,
            pool,
            gate,
            retry,
            generations: DashMap::new(),
            next_generation: AtomicU64::new(0),
            retry_tx,
            retry_rx: Mutex::new(Some(retry_rx)),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn registry(&self) -> &Arc<PlanRegistry> {
        &self.registry
    }

    /// Full refreshes in flight plus retries waiting for their backoff.
    pub fn pending_refreshes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolves once no full refresh or retry is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending_refreshes() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn generation(&self, api_id: &str) -> Option<u64> {
        self.generations.get(api_id).map(|entry| *entry.value())
    }

    pub async fn handle_event(self: &Arc<Self>, event: &LifecycleEvent) {
        debug!(kind = %event.kind, api_id = %event.api_id(), "lifecycle event received");
        match event.kind {
            LifecycleEventKind::Deploy => self.register(vec![event.api.clone()]).await,
            LifecycleEventKind::Undeploy => self.unregister(event.api_id()),
            LifecycleEventKind::Update => {
                self.unregister(event.api_id());
                self.register(vec![event.api.clone()]).await;
            }
        }
    }

    /// Registers `apis` under fresh generations and launches their full refresh.
    pub async fn register(self: &Arc<Self>, apis: Vec<Api>) {
        let generations = apis
            .iter()
            .map(|api| (api.id.clone(), self.bump_generation(&api.id)))
            .collect();
        self.dispatch(RetryRequest {
            apis,
            attempt: 0,
            generations,
        })
        .await;
    }

    /// Drops the registry entry of `api_id` and invalidates its pending work.
    pub fn unregister(&self, api_id: &str) {
        self.generations.remove(api_id);
        if self.registry.unregister(api_id) {
            info!(api_id = %api_id, "api unregistered from api key sync");
        }
    }

    /// Consumes retry requests until `shutdown` fires. Only one worker can
    /// hold the queue; a second call returns `None`.
    pub async fn start_retry_worker(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let mut retry_rx = self.retry_rx.lock().await.take()?;
        let controller = Arc::clone(self);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = retry_rx.recv() => {
                        let Some(request) = request else { break };
                        controller.schedule_retry(request, shutdown.clone());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            *controller.retry_rx.lock().await = Some(retry_rx);
            debug!("full refresh retry worker stopped");
        }))
    }

    /// Waits out the backoff of `request`, then dispatches it. A shutdown
    /// during the wait puts the request back on the queue untouched, so it
    /// resumes when a retry worker is started again.
    fn schedule_retry(self: &Arc<Self>, request: RetryRequest, mut shutdown: watch::Receiver<bool>) {
        let delay = self.retry.backoff(request.attempt);
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    controller.dispatch(request).await;
                    controller.finish_one();
                }
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    debug!(apis = ?request.api_ids(), attempt = request.attempt, "retry parked until restart");
                    if controller.retry_tx.send(request).is_err() {
                        controller.finish_one();
                    }
                }
            }
        });
    }

    async fn dispatch(self: &Arc<Self>, mut request: RetryRequest) {
        request.apis.retain(|api| self.is_current(&api.id, &request.generations));
        if request.apis.is_empty() {
            debug!(attempt = request.attempt, "registration superseded, nothing to do");
            return;
        }

        let selection = self.registry.select(&request.apis);
        for api_id in &selection.dropped {
            self.registry.unregister(api_id);
        }
        if selection.is_empty() {
            return;
        }

        if !self.gate.allows_work().await {
            // Not master: keep the plans tracked without touching the store.
            self.merge_current(selection.entries, &request.generations);
            return;
        }

        let task = RefreshTask::full(selection.plan_ids());
        let refresher = self.refresher.clone();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = self.pool.spawn(async move { refresher.run(&task).await });

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let result = pending.join().await;
            controller.complete(request, selection, result);
            controller.finish_one();
        });
    }

    fn complete(&self, request: RetryRequest, selection: PlanSelection, result: RefreshResult) {
        let Some(cause) = result.cause else {
            let merged = self.merge_current(selection.entries, &request.generations);
            if merged.is_empty() {
                debug!("full refresh done for superseded registration");
                return;
            }
            info!(apis = ?merged, keys = result.keys_refreshed, "api registered for api key sync");
            return;
        };

        let apis: Vec<Api> = request
            .apis
            .into_iter()
            .filter(|api| {
                selection.entries.contains_key(&api.id) && self.is_current(&api.id, &request.generations)
            })
            .collect();
        if apis.is_empty() {
            debug!(error = %cause, "full refresh failed for superseded registration");
            return;
        }

        let attempt = request.attempt + 1;
        let retry = RetryRequest {
            apis,
            attempt,
            generations: request.generations,
        };
        if !cause.is_transient() {
            error!(apis = ?retry.api_ids(), error = %cause, "full refresh failed permanently, not retrying");
            return;
        }
        if !self.retry.allows(attempt) {
            error!(apis = ?retry.api_ids(), attempts = attempt, error = %cause, "full refresh failed, giving up");
            return;
        }

        warn!(
            apis = ?retry.api_ids(),
            attempt,
            backoff_ms = self.retry.backoff(attempt).as_millis() as u64,
            error = %cause,
            "full refresh failed, retrying"
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.retry_tx.send(retry).is_err() {
            warn!("retry queue closed, dropping full refresh retry");
            self.finish_one();
        }
    }

    /// Merges the entries whose generation is still live. The generation
    /// entry stays locked across the insert, so a concurrent `unregister`
    /// either runs first or removes what was merged.
    fn merge_current(
        &self,
        entries: HashMap<String, BTreeSet<String>>,
        generations: &HashMap<String, u64>,
    ) -> Vec<String> {
        let mut merged = Vec::new();
        for (api_id, plans) in entries {
            let Some(requested) = generations.get(&api_id) else {
                continue;
            };
            let Some(live) = self.generations.get(&api_id) else {
                continue;
            };
            if *live != *requested {
                continue;
            }
            self.registry.insert(&api_id, plans);
            drop(live);
            merged.push(api_id);
        }
        merged.sort();
        merged
    }

    fn bump_generation(&self, api_id: &str) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.generations.insert(api_id.to_string(), generation);
        generation
    }

    fn is_current(&self, api_id: &str, generations: &HashMap<String, u64>) -> bool {
        match (self.generation(api_id), generations.get(api_id)) {
            (Some(live), Some(requested)) => live == *requested,
            _ => false,
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for RegistrationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationController")
            .field("registered", &self.registry.len())
            .field("pending", &self.pending_refreshes())
            .finish()
    }
}
