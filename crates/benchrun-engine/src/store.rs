//! Durable-store seam for Task and Run rows.
//!
//! The trait captures what the engine needs from persistence: atomic
//! create-many for dispatch, a compare-and-swap claim on run status, a
//! holder-checked terminal write, and an atomic update over a single task
//! row together with its runs. `MemoryStore` is the reference
//! implementation; a relational backend would satisfy the same contract
//! with row locks and conditional updates.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use benchrun_core::{Run, RunKey, RunOutcome, Task, TaskId, WorkerId};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task already exists: {0}")]
    TaskExists(TaskId),

    #[error("run not found: {0}")]
    RunNotFound(RunKey),

    #[error("run already exists: {0}")]
    RunExists(RunKey),

    #[error("run {0} is already terminal")]
    AlreadyTerminal(RunKey),

    #[error("worker {worker} does not hold the claim on run {key}")]
    NotClaimHolder { key: RunKey, worker: WorkerId },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a claim attempt.
///
/// The queue is at-least-once, so the same work-item may be delivered to
/// multiple workers; every outcome other than `Granted` is a no-op for the
/// caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Claim granted; the caller is now the exclusive executor.
    Granted(Run),
    /// The run already reached a terminal state.
    AlreadyTerminal,
    /// Another worker holds a live claim.
    AlreadyClaimed,
}

/// Atomic mutation applied to a task row. The slice holds the task's runs,
/// ordered by run number, read under the same isolation as the mutation.
pub type TaskMutation = Box<dyn FnOnce(&mut Task, &[Run]) + Send>;

/// Persistence contract for Task and Run rows.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_task(&self, task: Task) -> Result<(), StoreError>;

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Apply a mutation to the task row atomically with respect to every
    /// other task update and terminal run write. Returns the updated task.
    async fn update_task(&self, id: &TaskId, mutation: TaskMutation) -> Result<Task, StoreError>;

    /// Delete a task and all of its runs.
    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError>;

    /// Create all given runs, or none of them if any key already exists.
    async fn create_runs(&self, runs: Vec<Run>) -> Result<(), StoreError>;

    async fn get_run(&self, key: &RunKey) -> Result<Option<Run>, StoreError>;

    /// All runs of a task, ordered by run number.
    async fn list_runs(&self, task_id: &TaskId) -> Result<Vec<Run>, StoreError>;

    /// Compare-and-swap the run from `pending` to `running`, recording the
    /// claim holder and claim time.
    async fn claim_run(&self, key: &RunKey, worker: &WorkerId)
        -> Result<ClaimOutcome, StoreError>;

    /// Write the terminal state of a run. Only the claim holder may write;
    /// a second terminal write is rejected with `AlreadyTerminal`.
    async fn write_terminal(
        &self,
        key: &RunKey,
        worker: &WorkerId,
        outcome: RunOutcome,
    ) -> Result<Run, StoreError>;

    /// Pending runs created before `cutoff` that no worker has claimed.
    /// Fed to the reconcile sweep.
    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<RunKey>, StoreError>;
}

#[derive(Default)]
struct Tables {
    tasks: HashMap<TaskId, Task>,
    // Keyed by task, ordered by run number within it.
    runs: HashMap<TaskId, BTreeMap<u32, Run>>,
}

/// In-memory reference store.
///
/// Both tables live under one lock, so a task update observes its runs
/// exactly as of the update and concurrent counter recomputations cannot
/// lose writes.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_task(&self, task: Task) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.tasks.contains_key(&task.id) {
            return Err(StoreError::TaskExists(task.id));
        }
        tables.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tables.read().await.tasks.get(id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tables.read().await.tasks.values().cloned().collect())
    }

    async fn update_task(&self, id: &TaskId, mutation: TaskMutation) -> Result<Task, StoreError> {
        let mut tables = self.tables.write().await;
        let runs: Vec<Run> = tables
            .runs
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        let task = tables
            .tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        mutation(task, &runs);
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .tasks
            .remove(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        tables.runs.remove(id);
        Ok(())
    }

    async fn create_runs(&self, runs: Vec<Run>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for run in &runs {
            if let Some(existing) = tables.runs.get(&run.task_id) {
                if existing.contains_key(&run.run_number) {
                    return Err(StoreError::RunExists(run.key()));
                }
            }
        }
        for run in runs {
            tables
                .runs
                .entry(run.task_id.clone())
                .or_default()
                .insert(run.run_number, run);
        }
        Ok(())
    }

    async fn get_run(&self, key: &RunKey) -> Result<Option<Run>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .runs
            .get(&key.task_id)
            .and_then(|m| m.get(&key.run_number))
            .cloned())
    }

    async fn list_runs(&self, task_id: &TaskId) -> Result<Vec<Run>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .runs
            .get(task_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn claim_run(
        &self,
        key: &RunKey,
        worker: &WorkerId,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        let run = tables
            .runs
            .get_mut(&key.task_id)
            .and_then(|m| m.get_mut(&key.run_number))
            .ok_or_else(|| StoreError::RunNotFound(key.clone()))?;

        if run.status.is_terminal() {
            return Ok(ClaimOutcome::AlreadyTerminal);
        }
        if run.status == benchrun_core::RunStatus::Running {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        run.status = benchrun_core::RunStatus::Running;
        run.claimed_by = Some(worker.clone());
        run.started_at = Some(Utc::now());
        Ok(ClaimOutcome::Granted(run.clone()))
    }

    async fn write_terminal(
        &self,
        key: &RunKey,
        worker: &WorkerId,
        outcome: RunOutcome,
    ) -> Result<Run, StoreError> {
        debug_assert!(outcome.status.is_terminal());
        let mut tables = self.tables.write().await;
        let run = tables
            .runs
            .get_mut(&key.task_id)
            .and_then(|m| m.get_mut(&key.run_number))
            .ok_or_else(|| StoreError::RunNotFound(key.clone()))?;

        if run.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(key.clone()));
        }
        if run.claimed_by.as_ref() != Some(worker) {
            return Err(StoreError::NotClaimHolder {
                key: key.clone(),
                worker: worker.clone(),
            });
        }

        let now = Utc::now();
        run.status = outcome.status;
        run.completed_at = Some(now);
        run.tests_total = outcome.tests_total;
        run.tests_passed = outcome.tests_passed;
        run.tests_failed = outcome.tests_failed;
        run.logs = outcome.logs;
        run.error_message = outcome.error_message;
        run.duration_seconds = outcome.duration_seconds.or_else(|| {
            run.started_at
                .map(|s| (now - s).num_milliseconds() as f64 / 1000.0)
        });
        Ok(run.clone())
    }

    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<RunKey>, StoreError> {
        let tables = self.tables.read().await;
        let mut stale = Vec::new();
        for runs in tables.runs.values() {
            for run in runs.values() {
                if run.status == benchrun_core::RunStatus::Pending && run.created_at < cutoff {
                    stale.push(run.key());
                }
            }
        }
        Ok(stale)
    }
}
