//! Periodic driver of the refresh orchestrator.
//!
//! Ticks run on a single lane: the orchestrator sits behind one async mutex
//! and a single background task drives it, so a tick never starts before the
//! previous one returned. Missed ticks are delayed rather than replayed in a
//! burst. A panicking tick is logged and the next one still runs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::orchestrator::{CycleOutcome, RefreshOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

struct RunningLane {
    period: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SyncScheduler {
    orchestrator: Arc<Mutex<RefreshOrchestrator>>,
    lane: Mutex<Option<RunningLane>>,
}

impl SyncScheduler {
    pub fn new(orchestrator: RefreshOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            lane: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        if self.lane.lock().await.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub async fn period(&self) -> Option<Duration> {
        self.lane.lock().await.as_ref().map(|lane| lane.period)
    }

    /// Starts ticking every `period`, first tick immediately.
    pub async fn start(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(SyncError::config("scheduler period must be > 0"));
        }

        let mut lane = self.lane.lock().await;
        if lane.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let orchestrator = Arc::clone(&self.orchestrator);

        let handle = tokio::spawn(async move {
            info!(period_ms = period.as_millis() as u64, "api key sync scheduler started");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = run_tick(&orchestrator).await {
                            error!(error = %e, "api key sync tick failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("api key sync scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        *lane = Some(RunningLane {
            period,
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Cancels future ticks and waits for the in-flight one, if any.
    /// Stopping a stopped scheduler is a no-op.
    pub async fn stop(&self) {
        let Some(lane) = self.lane.lock().await.take() else {
            debug!("api key sync scheduler already stopped");
            return;
        };

        let _ = lane.shutdown_tx.send(true);
        if let Err(e) = lane.handle.await {
            warn!(error = %e, "api key sync scheduler task ended abnormally");
        }
    }

    /// Runs one cycle now on the same lane as periodic ticks.
    pub async fn trigger_now(&self) -> Result<CycleOutcome> {
        run_tick(&self.orchestrator).await
    }

    pub fn orchestrator(&self) -> &Arc<Mutex<RefreshOrchestrator>> {
        &self.orchestrator
    }
}

async fn run_tick(orchestrator: &Mutex<RefreshOrchestrator>) -> Result<CycleOutcome> {
    let cycle = async {
        let mut orchestrator = orchestrator.lock().await;
        orchestrator.run_cycle().await
    };

    AssertUnwindSafe(cycle).catch_unwind().await.map_err(|panic| {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        SyncError::Panicked(message)
    })
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler").finish_non_exhaustive()
    }
}
