use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of the API-key synchronization service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of plan ids handled by one refresh task.
    #[serde(default = "default_bulk_items")]
    pub bulk_items: usize,
    /// When false every node refreshes; when true only the cluster master does.
    #[serde(default)]
    pub distributed: bool,
    /// Period between two incremental cycles.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Number of refresh tasks allowed to run at once.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Deadline of a single refresh task.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Full refresh retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_bulk_items() -> usize {
    100
}
fn default_period_ms() -> u64 {
    10_000
}
fn default_worker_threads() -> usize {
    4
}
fn default_task_timeout_ms() -> u64 {
    60_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bulk_items: default_bulk_items(),
            distributed: false,
            period_ms: default_period_ms(),
            worker_threads: default_worker_threads(),
            task_timeout_ms: default_task_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.bulk_items == 0 {
            return Err("sync.bulk_items must be > 0".into());
        }
        if self.period_ms == 0 {
            return Err("sync.period_ms must be > 0".into());
        }
        if self.worker_threads == 0 {
            return Err("sync.worker_threads must be > 0".into());
        }
        if self.task_timeout_ms == 0 {
            return Err("sync.task_timeout_ms must be > 0".into());
        }
        self.retry.validate()
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Bounded exponential backoff for failed full refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Give up after this many retries. `None` retries until success.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_backoff_ms == 0 {
            return Err("sync.retry.initial_backoff_ms must be > 0".into());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("sync.retry.initial_backoff_ms must be <= sync.retry.max_backoff_ms".into());
        }
        if self.max_attempts == Some(0) {
            return Err("sync.retry.max_attempts must be > 0 when set".into());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): doubles each time,
    /// capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let initial = Duration::from_millis(self.initial_backoff_ms);
        let max = Duration::from_millis(self.max_backoff_ms);
        let exponent = attempt.saturating_sub(1).min(31);
        initial.saturating_mul(1u32 << exponent).min(max)
    }

    /// Whether retry number `attempt` is still allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}
