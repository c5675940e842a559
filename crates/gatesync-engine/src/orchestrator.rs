//! One incremental synchronization cycle.
//!
//! A cycle passes the mastership gate, captures the end of its window,
//! splits the tracked plans into chunks of at most `bulk_items` ids, runs one
//! incremental refresh per chunk on the worker pool and waits for all of
//! them. The watermark moves to the window end only when every chunk
//! succeeded; a single failed chunk holds it so the next cycle re-covers the
//! same range.

use std::fmt;
use std::sync::Arc;

use gatesync_core::{RefreshWindow, Watermark, now_utc};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::cluster::MastershipGate;
use crate::pool::WorkerPool;
use crate::refresher::{ApiKeyRefresher, RefreshTask};
use crate::registry::PlanRegistry;

/// Source of "now" for window boundaries.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// What a cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Gate closed: no store call, watermark untouched.
    Skipped,
    /// Nothing registered: the watermark moved without any store call.
    Idle { watermark: Watermark },
    /// Chunks were refreshed; the watermark moved only if none failed.
    Completed {
        window: RefreshWindow,
        chunks: usize,
        failed_chunks: usize,
        keys_refreshed: usize,
    },
}

impl CycleOutcome {
    pub fn advanced_watermark(&self) -> bool {
        match self {
            CycleOutcome::Skipped => false,
            CycleOutcome::Idle { .. } => true,
            CycleOutcome::Completed { failed_chunks, .. } => *failed_chunks == 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CycleOutcome::Completed { failed_chunks, .. } if *failed_chunks > 0)
    }
}

/// Diagnostics record of the last cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    /// Watermark after the cycle.
    pub watermark: Watermark,
}

/// Splits `plans` into consecutive groups of at most `bulk_items` ids.
pub fn chunk_plans(plans: &[String], bulk_items: usize) -> Vec<Vec<String>> {
    plans
        .chunks(bulk_items.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

pub struct RefreshOrchestrator {
    registry: Arc<PlanRegistry>,
    refresher: ApiKeyRefresher,
    pool: WorkerPool,
    gate: MastershipGate,
    bulk_items: usize,
    clock: Clock,
    last_refresh_at: Watermark,
    watermark_tx: watch::Sender<Watermark>,
    report_tx: watch::Sender<Option<CycleReport>>,
}

impl RefreshOrchestrator {
    pub fn new(
        registry: Arc<PlanRegistry>,
        refresher: ApiKeyRefresher,
        pool: WorkerPool,
        gate: MastershipGate,
        bulk_items: usize,
    ) -> Self {
        let (watermark_tx, _) = watch::channel(Watermark::Never);
        let (report_tx, _) = watch::channel(None);
        Self {
            registry,
            refresher,
            pool,
            gate,
            bulk_items: bulk_items.max(1),
            clock: Arc::new(now_utc),
            last_refresh_at: Watermark::Never,
            watermark_tx,
            report_tx,
        }
    }

    /// Replaces the wall clock, mostly for tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn watermark(&self) -> Watermark {
        self.last_refresh_at
    }

    pub fn subscribe_watermark(&self) -> watch::Receiver<Watermark> {
        self.watermark_tx.subscribe()
    }

    pub fn subscribe_reports(&self) -> watch::Receiver<Option<CycleReport>> {
        self.report_tx.subscribe()
    }

    pub fn bulk_items(&self) -> usize {
        self.bulk_items
    }

    /// Runs one cycle to completion.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let started_at = now_utc();
        let outcome = self.execute().await;
        self.report_tx.send_replace(Some(CycleReport {
            started_at,
            finished_at: now_utc(),
            outcome: outcome.clone(),
            watermark: self.last_refresh_at,
        }));
        outcome
    }

    async fn execute(&mut self) -> CycleOutcome {
        if !self.gate.allows_work().await {
            tracing::debug!("not master node, skipping api key refresh");
            return CycleOutcome::Skipped;
        }

        let next_refresh_at = (self.clock)();
        let plans = self.registry.tracked_plans();

        if plans.is_empty() {
            self.advance(next_refresh_at);
            tracing::trace!(watermark = %self.last_refresh_at, "no api key plan registered");
            return CycleOutcome::Idle {
                watermark: self.last_refresh_at,
            };
        }

        let window = RefreshWindow::new(self.last_refresh_at, next_refresh_at);
        let chunks = chunk_plans(&plans, self.bulk_items);
        let chunk_count = chunks.len();
        tracing::debug!(%window, plans = plans.len(), chunks = chunk_count, "refreshing api keys");

        let tasks = chunks.into_iter().map(|chunk| {
            let refresher = self.refresher.clone();
            let task = RefreshTask::incremental(chunk, window);
            async move { refresher.run(&task).await }
        });
        let results = self.pool.invoke_all(tasks).await;

        let keys_refreshed: usize = results.iter().map(|r| r.keys_refreshed).sum();
        let failures: Vec<_> = results.iter().filter_map(|r| r.cause.as_ref()).collect();

        if failures.is_empty() {
            self.advance(next_refresh_at);
            tracing::info!(%window, chunks = chunk_count, keys = keys_refreshed, "api keys refreshed");
        } else {
            tracing::warn!(
                %window,
                chunks = chunk_count,
                failed_chunks = failures.len(),
                first_error = %failures[0],
                "api key refresh failed, watermark held"
            );
        }

        CycleOutcome::Completed {
            window,
            chunks: chunk_count,
            failed_chunks: failures.len(),
            keys_refreshed,
        }
    }

    fn advance(&mut self, to: OffsetDateTime) {
        if self.last_refresh_at.advance(to) {
            self.watermark_tx.send_replace(self.last_refresh_at);
        } else {
            tracing::debug!(watermark = %self.last_refresh_at, "clock did not move forward, watermark kept");
        }
    }
}

impl fmt::Debug for RefreshOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshOrchestrator")
            .field("bulk_items", &self.bulk_items)
            .field("watermark", &self.last_refresh_at)
            .finish()
    }
}
