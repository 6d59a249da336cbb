//! Fan-out dispatcher: turns one task submission into N schedulable runs.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use benchrun_core::{Run, RunKey, TaskId, TaskStatus};

use crate::config::EngineConfig;
use crate::queue::WorkQueue;
use crate::store::{Store, StoreError};

/// Dispatcher errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("run count {requested} outside 1..={max}")]
    RunCountOutOfRange { requested: u32, max: u32 },

    #[error("task {id} is {status:?} and cannot be dispatched")]
    NotDispatchable { id: TaskId, status: TaskStatus },

    #[error("task {id} is {status:?}; only completed or failed tasks can be retried")]
    NotRetryable { id: TaskId, status: TaskStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a dispatch call.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReceipt {
    pub task_id: TaskId,
    /// Run rows created by this call. Zero for an idempotent re-dispatch.
    pub runs_created: u32,
    /// Work-items successfully enqueued. Anything short of `runs_created`
    /// is picked up by the reconcile sweep.
    pub enqueued: u32,
}

/// Fan-out dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    queue: Arc<dyn WorkQueue>,
    config: EngineConfig,
}

impl Dispatcher {
    /// Create a new Dispatcher.
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn WorkQueue>, config: EngineConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Fan a pending task out into `requested_run_count` runs.
    ///
    /// Run creation is all-or-nothing; no partial fan-out is ever visible.
    /// Re-dispatch of an already-dispatched task succeeds without duplicate
    /// fan-out.
    pub async fn dispatch(&self, task_id: &TaskId) -> Result<DispatchReceipt, DispatchError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| DispatchError::TaskNotFound(task_id.clone()))?;

        if task.status != TaskStatus::Pending {
            // Counters showing a completed fan-out make re-dispatch a no-op.
            if task.total_runs >= task.requested_run_count {
                info!(task_id = %task_id, "Dispatch already completed; ignoring re-dispatch");
                return Ok(DispatchReceipt {
                    task_id: task_id.clone(),
                    runs_created: 0,
                    enqueued: 0,
                });
            }
            return Err(DispatchError::NotDispatchable {
                id: task_id.clone(),
                status: task.status,
            });
        }

        let n = task.requested_run_count;
        self.check_run_count(n)?;

        let runs: Vec<Run> = (1..=n).map(|i| Run::new(task_id.clone(), i)).collect();
        let keys: Vec<RunKey> = runs.iter().map(Run::key).collect();
        self.store.create_runs(runs).await?;

        self.store
            .update_task(
                task_id,
                Box::new(|task, runs| {
                    task.status = TaskStatus::Running;
                    task.started_at = Some(Utc::now());
                    task.total_runs = runs.len() as u32;
                }),
            )
            .await?;

        let enqueued = self.enqueue_with_retry(task_id, keys).await;

        info!(
            task_id = %task_id,
            runs = n,
            enqueued,
            "Task dispatched"
        );

        Ok(DispatchReceipt {
            task_id: task_id.clone(),
            runs_created: n,
            enqueued,
        })
    }

    /// Dispatch a fresh generation of runs for a completed or failed task.
    ///
    /// Historical runs are never mutated or deleted; the new generation
    /// starts after the highest existing run number.
    pub async fn retry(&self, task_id: &TaskId) -> Result<DispatchReceipt, DispatchError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| DispatchError::TaskNotFound(task_id.clone()))?;

        if !matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
            return Err(DispatchError::NotRetryable {
                id: task_id.clone(),
                status: task.status,
            });
        }

        let n = task.requested_run_count;
        self.check_run_count(n)?;

        let existing = self.store.list_runs(task_id).await?;
        let base = existing.last().map(|r| r.run_number).unwrap_or(0);

        let runs: Vec<Run> = (base + 1..=base + n)
            .map(|i| Run::new(task_id.clone(), i))
            .collect();
        let keys: Vec<RunKey> = runs.iter().map(Run::key).collect();
        self.store.create_runs(runs).await?;

        self.store
            .update_task(
                task_id,
                Box::new(|task, runs| {
                    task.status = TaskStatus::Running;
                    task.started_at = Some(Utc::now());
                    task.completed_at = None;
                    task.total_runs = runs.len() as u32;
                }),
            )
            .await?;

        let enqueued = self.enqueue_with_retry(task_id, keys).await;

        info!(
            task_id = %task_id,
            fresh_runs = n,
            first_run_number = base + 1,
            "Task retried with a fresh run generation"
        );

        Ok(DispatchReceipt {
            task_id: task_id.clone(),
            runs_created: n,
            enqueued,
        })
    }

    /// Re-enqueue pending runs whose creation exceeded the grace period
    /// with no claim and no queued work-item. Returns how many were
    /// re-enqueued.
    ///
    /// A run row without a corresponding work-item is an invalid state;
    /// this sweep is the reconciliation path for partial enqueue failure
    /// and lost deliveries.
    pub async fn reconcile(&self) -> Result<usize, DispatchError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.pending_grace).unwrap_or_default();
        let stale = self.store.list_stale_pending(cutoff).await?;

        let mut requeued = 0;
        for key in stale {
            // Pending runs of a cancelled task must never execute.
            let task = self.store.get_task(&key.task_id).await?;
            let cancelled = matches!(task, Some(t) if t.status == TaskStatus::Cancelled);
            if cancelled || self.queue.contains(&key).await {
                continue;
            }
            match self.queue.enqueue(key.clone()).await {
                Ok(()) => requeued += 1,
                Err(e) => warn!(run = %key, error = %e, "Reconcile enqueue failed"),
            }
        }

        if requeued > 0 {
            info!(requeued, "Reconcile sweep re-enqueued stale pending runs");
        }
        Ok(requeued)
    }

    fn check_run_count(&self, n: u32) -> Result<(), DispatchError> {
        if n < 1 || n > self.config.max_runs_per_task {
            return Err(DispatchError::RunCountOutOfRange {
                requested: n,
                max: self.config.max_runs_per_task,
            });
        }
        Ok(())
    }

    /// Enqueue every key, retrying the failed subset a bounded number of
    /// times. Whatever still fails is left for the reconcile sweep.
    async fn enqueue_with_retry(&self, task_id: &TaskId, keys: Vec<RunKey>) -> u32 {
        let total = keys.len();
        let mut remaining = keys;
        let mut enqueued = 0u32;

        for attempt in 0..=self.config.enqueue_retries {
            let mut failed = Vec::new();
            for key in remaining {
                match self.queue.enqueue(key.clone()).await {
                    Ok(()) => enqueued += 1,
                    Err(e) => {
                        warn!(run = %key, attempt, error = %e, "Enqueue failed");
                        failed.push(key);
                    }
                }
            }
            if failed.is_empty() {
                return enqueued;
            }
            remaining = failed;
        }

        warn!(
            task_id = %task_id,
            missing = total - enqueued as usize,
            "Enqueue incomplete after retries; reconcile sweep will recover"
        );
        enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchrun_core::{HarnessConfig, RunStatus, Task};
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;

    fn engine_parts() -> (Arc<MemoryStore>, Arc<MemoryQueue>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = Dispatcher::new(store.clone(), queue.clone(), EngineConfig::default());
        (store, queue, dispatcher)
    }

    async fn submitted_task(store: &MemoryStore, n: u32) -> TaskId {
        let task = Task::new(
            "demo",
            HarnessConfig::new("ref", "openai/gpt-4o", "terminus-2", "harbor"),
            n,
        );
        let id = task.id.clone();
        store.create_task(task).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_dispatch_creates_n_unique_runs_and_enqueues_all() {
        let (store, queue, dispatcher) = engine_parts();
        let id = submitted_task(&store, 10).await;

        let receipt = dispatcher.dispatch(&id).await.unwrap();
        assert_eq!(receipt.runs_created, 10);
        assert_eq!(receipt.enqueued, 10);

        let runs = store.list_runs(&id).await.unwrap();
        assert_eq!(runs.len(), 10);
        let numbers: Vec<u32> = runs.iter().map(|r| r.run_number).collect();
        assert_eq!(numbers, (1..=10).collect::<Vec<u32>>());
        assert!(runs.iter().all(|r| r.status == RunStatus::Pending));

        let task = store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.total_runs, 10);
        assert!(task.started_at.is_some());
        assert_eq!(queue.depth().await, 10);
    }

    #[tokio::test]
    async fn test_redispatch_is_idempotent() {
        let (store, queue, dispatcher) = engine_parts();
        let id = submitted_task(&store, 5).await;

        dispatcher.dispatch(&id).await.unwrap();
        let second = dispatcher.dispatch(&id).await.unwrap();

        assert_eq!(second.runs_created, 0);
        assert_eq!(store.list_runs(&id).await.unwrap().len(), 5);
        assert_eq!(queue.depth().await, 5);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_run_count_over_ceiling() {
        let (store, _queue, dispatcher) = engine_parts();
        let id = submitted_task(&store, 101).await;

        let err = dispatcher.dispatch(&id).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RunCountOutOfRange { requested: 101, max: 100 }
        ));
        assert!(store.list_runs(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_task() {
        let (_store, _queue, dispatcher) = engine_parts();
        let err = dispatcher.dispatch(&TaskId::new("nope")).await.unwrap_err();
        assert!(matches!(err, DispatchError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_retry_appends_fresh_run_numbers() {
        let (store, queue, dispatcher) = engine_parts();
        let id = submitted_task(&store, 3).await;
        dispatcher.dispatch(&id).await.unwrap();

        // Mark every first-generation run terminal and the task completed.
        for i in 1..=3 {
            let key = RunKey::new(id.clone(), i);
            let worker = benchrun_core::WorkerId::new("w1");
            store.claim_run(&key, &worker).await.unwrap();
            store
                .write_terminal(&key, &worker, benchrun_core::RunOutcome::error("infra"))
                .await
                .unwrap();
        }
        store
            .update_task(
                &id,
                Box::new(|task, _| {
                    task.status = TaskStatus::Completed;
                }),
            )
            .await
            .unwrap();
        while queue.depth().await > 0 {
            let d = queue.pull().await;
            queue.ack(&d).await;
        }

        let receipt = dispatcher.retry(&id).await.unwrap();
        assert_eq!(receipt.runs_created, 3);

        let runs = store.list_runs(&id).await.unwrap();
        let numbers: Vec<u32> = runs.iter().map(|r| r.run_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);

        // History untouched, fresh generation pending.
        assert!(runs[..3].iter().all(|r| r.status == RunStatus::Error));
        assert!(runs[3..].iter().all(|r| r.status == RunStatus::Pending));

        let task = store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.total_runs, 6);
        assert_eq!(queue.depth().await, 3);
    }

    #[tokio::test]
    async fn test_retry_rejects_active_task() {
        let (store, _queue, dispatcher) = engine_parts();
        let id = submitted_task(&store, 2).await;
        dispatcher.dispatch(&id).await.unwrap();

        let err = dispatcher.retry(&id).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotRetryable { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_requeues_stale_pending_only() {
        let (store, queue, dispatcher) = engine_parts();
        let id = submitted_task(&store, 2).await;

        let mut stale = Run::new(id.clone(), 1);
        stale.created_at = Utc::now() - chrono::Duration::seconds(600);
        let fresh = Run::new(id.clone(), 2);
        store.create_runs(vec![stale, fresh]).await.unwrap();

        let requeued = dispatcher.reconcile().await.unwrap();
        assert_eq!(requeued, 1);
        assert!(queue.contains(&RunKey::new(id.clone(), 1)).await);

        // A second sweep sees the item already queued and does nothing.
        let again = dispatcher.reconcile().await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(queue.depth().await, 1);
    }

    #[tokio::test]
    async fn test_reconcile_skips_cancelled_tasks() {
        let (store, queue, dispatcher) = engine_parts();
        let id = submitted_task(&store, 1).await;

        let mut stale = Run::new(id.clone(), 1);
        stale.created_at = Utc::now() - chrono::Duration::seconds(600);
        store.create_runs(vec![stale]).await.unwrap();
        store
            .update_task(
                &id,
                Box::new(|task, _| {
                    task.status = TaskStatus::Cancelled;
                }),
            )
            .await
            .unwrap();

        let requeued = dispatcher.reconcile().await.unwrap();
        assert_eq!(requeued, 0);
        assert_eq!(queue.depth().await, 0);
    }
}
