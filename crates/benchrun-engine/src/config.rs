//! Engine configuration.

use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fan-out ceiling: maximum runs a single task may request. Protects
    /// the downstream worker pool from unbounded fan-out.
    pub max_runs_per_task: u32,

    /// Number of workers in the pool.
    pub workers: usize,

    /// Grace period before a pending run with no claim is considered stale
    /// and re-enqueued by the reconcile sweep.
    pub pending_grace: Duration,

    /// Interval between reconcile sweeps.
    pub sweep_interval: Duration,

    /// Interval between queue-depth metric publications.
    pub metrics_interval: Duration,

    /// Immediate retry attempts for work-items that failed to enqueue
    /// during dispatch, before the sweep takes over.
    pub enqueue_retries: u32,

    /// Maximum bytes of harness logs kept per run.
    pub max_log_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_runs_per_task: 100,
            workers: 4,
            pending_grace: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(60),
            enqueue_retries: 2,
            max_log_bytes: 50_000,
        }
    }
}
