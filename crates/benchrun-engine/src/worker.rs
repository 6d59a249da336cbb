//! Worker pool: pulls work-items, claims runs, drives the harness.
//!
//! Each worker is an independent pull loop. A worker blocks only inside the
//! harness invocation, and that wait is bounded by the task's timeout
//! budget and raced against the task's cancellation token - a hung harness
//! call never holds a claim indefinitely.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use benchrun_core::{ExecutionHarness, RunOutcome, Task, TaskStatus, WorkerId};

use crate::aggregator::StatusAggregator;
use crate::cancel::CancelRegistry;
use crate::config::EngineConfig;
use crate::queue::{Delivery, WorkQueue};
use crate::store::{ClaimOutcome, Store, StoreError};

/// Shared dependencies of every worker in the pool.
#[derive(Clone)]
pub(crate) struct WorkerDeps {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn WorkQueue>,
    pub harness: Arc<dyn ExecutionHarness>,
    pub aggregator: StatusAggregator,
    pub cancels: CancelRegistry,
    pub config: EngineConfig,
}

/// Fixed-size pool of run executors.
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers against the given dependencies.
    pub(crate) fn spawn(count: usize, deps: WorkerDeps) -> Self {
        let shutdown = CancellationToken::new();
        let handles = (0..count)
            .map(|i| {
                let worker_id = WorkerId::new(format!("worker-{i}"));
                let deps = deps.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(worker_id = %worker_id, "Worker started");
                    run_worker(worker_id, deps, shutdown).await;
                })
            })
            .collect();
        Self { shutdown, handles }
    }

    /// Stop pulling new work and wait for in-flight runs to finish their
    /// terminal writes.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(worker_id: WorkerId, deps: WorkerDeps, shutdown: CancellationToken) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = deps.queue.pull() => delivery,
        };

        if let Err(e) = process_delivery(&worker_id, &deps, &delivery).await {
            warn!(
                worker_id = %worker_id,
                run = %delivery.key,
                error = %e,
                "Delivery processing failed"
            );
        }
        deps.queue.ack(&delivery).await;
    }
    info!(worker_id = %worker_id, "Worker stopped");
}

/// Handle one delivery end to end: claim, execute, terminal write,
/// aggregation.
///
/// Run-level failures are captured as terminal status values and never
/// propagate as errors; the `Err` path here is store/queue plumbing only.
async fn process_delivery(
    worker_id: &WorkerId,
    deps: &WorkerDeps,
    delivery: &Delivery,
) -> Result<(), StoreError> {
    let key = &delivery.key;

    let Some(task) = deps.store.get_task(&key.task_id).await? else {
        warn!(run = %key, "Dropping work-item for unknown task");
        return Ok(());
    };

    // Straggler delivery for a cancelled task: ack and drop before
    // claiming, so pending runs never execute.
    if task.status == TaskStatus::Cancelled {
        debug!(run = %key, "Dropping work-item for cancelled task");
        return Ok(());
    }

    let run = match deps.store.claim_run(key, worker_id).await? {
        ClaimOutcome::Granted(run) => run,
        ClaimOutcome::AlreadyTerminal => {
            debug!(run = %key, "Duplicate delivery for terminal run; no-op");
            return Ok(());
        }
        ClaimOutcome::AlreadyClaimed => {
            debug!(run = %key, "Duplicate delivery for claimed run; no-op");
            return Ok(());
        }
    };

    info!(
        worker_id = %worker_id,
        task_id = %key.task_id,
        run_number = run.run_number,
        agent = %task.config.agent,
        model = %task.config.model,
        "Run claimed"
    );

    let outcome = execute_run(deps, &task, run.run_number).await;
    let status = outcome.status;

    match deps.store.write_terminal(key, worker_id, outcome).await {
        Ok(_) => {
            info!(
                worker_id = %worker_id,
                task_id = %key.task_id,
                run_number = run.run_number,
                status = ?status,
                "Run finished"
            );
        }
        // A racing write beat us; the run already has its one terminal
        // state and counters were already aggregated for it.
        Err(StoreError::AlreadyTerminal(_)) => {
            debug!(run = %key, "Terminal state already written; no-op");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    if let Err(e) = deps.aggregator.on_run_terminal(&key.task_id).await {
        warn!(task_id = %key.task_id, error = %e, "Aggregation failed");
    }
    Ok(())
}

/// Invoke the harness under the task's timeout budget, racing the task's
/// cancellation token. Always produces a terminal outcome.
async fn execute_run(deps: &WorkerDeps, task: &Task, run_number: u32) -> RunOutcome {
    let cancel = deps.cancels.token_for(&task.id);
    let budget = task.config.timeout();
    let seed = run_number as u64;
    let started = Instant::now();

    let mut outcome = tokio::select! {
        _ = cancel.cancelled() => {
            RunOutcome::error("task cancelled during execution")
        }
        result = tokio::time::timeout(budget, deps.harness.execute(&task.config, seed)) => {
            match result {
                // The timeout dropped the harness future; never trust the
                // harness to self-report this.
                Err(_elapsed) => RunOutcome::timeout(task.config.timeout_seconds),
                Ok(Err(e)) => RunOutcome::error(e.to_string()),
                Ok(Ok(report)) => RunOutcome::from_report(report),
            }
        }
    };

    if outcome.duration_seconds.is_none() {
        outcome.duration_seconds = Some(started.elapsed().as_secs_f64());
    }
    if let Some(logs) = outcome.logs.as_mut() {
        if logs.len() > deps.config.max_log_bytes {
            let mut cut = deps.config.max_log_bytes;
            while !logs.is_char_boundary(cut) {
                cut -= 1;
            }
            logs.truncate(cut);
        }
    }
    outcome
}
