//! The task engine facade: submission, lifecycle operations, and the
//! poller-facing read model.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use benchrun_core::{ExecutionHarness, HarnessConfig, Run, Task, TaskId, TaskStatus};

use crate::aggregator::StatusAggregator;
use crate::cancel::CancelRegistry;
use crate::config::EngineConfig;
use crate::dispatcher::{DispatchError, DispatchReceipt, Dispatcher};
use crate::metrics::MetricsSink;
use crate::queue::WorkQueue;
use crate::store::{Store, StoreError};
use crate::worker::{WorkerDeps, WorkerPool};

/// Engine errors surfaced to operators.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("invalid run count {requested}: must be between 1 and {max}")]
    InvalidRunCount { requested: u32, max: u32 },

    #[error("task {id} is {status:?}: {action} not allowed")]
    InvalidTaskState {
        id: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Filter for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// A task with its runs embedded, ordered by run number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: Task,
    pub runs: Vec<Run>,
}

/// Overall engine statistics across all tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub tasks_total: usize,
    pub tasks_pending: usize,
    pub tasks_running: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_cancelled: usize,
    pub runs_total: usize,
    pub runs_passed: usize,
    pub runs_failed: usize,
}

/// Orchestration engine: owns the stores, queue, dispatcher and aggregator
/// and exposes the operator/poller surface.
pub struct TaskEngine {
    store: Arc<dyn Store>,
    queue: Arc<dyn WorkQueue>,
    dispatcher: Dispatcher,
    aggregator: StatusAggregator,
    cancels: CancelRegistry,
    config: EngineConfig,
}

impl TaskEngine {
    /// Create a new TaskEngine over the given store and queue.
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn WorkQueue>, config: EngineConfig) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), queue.clone(), config.clone());
        let aggregator = StatusAggregator::new(store.clone());
        Self {
            store,
            queue,
            dispatcher,
            aggregator,
            cancels: CancelRegistry::new(),
            config,
        }
    }

    /// Submit a new task. Validation failures are rejected synchronously
    /// and never retried.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        config: HarnessConfig,
        requested_run_count: u32,
    ) -> Result<Task, EngineError> {
        if requested_run_count < 1 || requested_run_count > self.config.max_runs_per_task {
            return Err(EngineError::InvalidRunCount {
                requested: requested_run_count,
                max: self.config.max_runs_per_task,
            });
        }

        let task = Task::new(name, config, requested_run_count);
        let snapshot = task.clone();
        self.store.create_task(task).await?;

        info!(
            task_id = %snapshot.id,
            name = %snapshot.name,
            runs = requested_run_count,
            model = %snapshot.config.model,
            "Task submitted"
        );
        Ok(snapshot)
    }

    /// Fan the task out into its runs and enqueue them.
    pub async fn dispatch(&self, task_id: &TaskId) -> Result<DispatchReceipt, EngineError> {
        Ok(self.dispatcher.dispatch(task_id).await?)
    }

    /// Dispatch a fresh run generation for a completed or failed task.
    pub async fn retry(&self, task_id: &TaskId) -> Result<DispatchReceipt, EngineError> {
        Ok(self.dispatcher.retry(task_id).await?)
    }

    /// Cancel a task: latch the status, purge undelivered work-items, and
    /// signal workers to abandon in-flight runs.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<Task, EngineError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.clone()))?;
        if task.is_terminal() {
            return Err(EngineError::InvalidTaskState {
                id: task_id.clone(),
                status: task.status,
                action: "cancel",
            });
        }

        let task = self
            .store
            .update_task(
                task_id,
                Box::new(|task, _runs| {
                    // Guarded again under the store lock; a task that went
                    // terminal in between stays as it ended.
                    if !task.is_terminal() {
                        task.status = TaskStatus::Cancelled;
                        task.completed_at = Some(Utc::now());
                    }
                }),
            )
            .await?;

        let removed = self.queue.remove_task_items(task_id).await;
        self.cancels.cancel(task_id);

        info!(
            task_id = %task_id,
            removed_work_items = removed,
            "Task cancelled"
        );
        Ok(task)
    }

    /// Delete a task and all of its runs.
    pub async fn delete(&self, task_id: &TaskId) -> Result<(), EngineError> {
        self.store.delete_task(task_id).await?;
        self.queue.remove_task_items(task_id).await;
        self.cancels.remove(task_id);
        info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    /// Read model: one task with its runs. Pure read, atomic per task row.
    pub async fn get_task(&self, task_id: &TaskId) -> Result<TaskDetail, EngineError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.clone()))?;
        let runs = self.store.list_runs(task_id).await?;
        Ok(TaskDetail { task, runs })
    }

    /// Read model: task summaries, newest first, optionally filtered by
    /// status.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, EngineError> {
        let mut tasks = self.store.list_tasks().await?;
        if let Some(status) = filter.status {
            tasks.retain(|t| t.status == status);
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let tasks = tasks
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(tasks)
    }

    /// Read model: overall counts across all tasks and runs.
    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let tasks = self.store.list_tasks().await?;
        let mut stats = EngineStats {
            tasks_total: tasks.len(),
            ..EngineStats::default()
        };
        for task in &tasks {
            match task.status {
                TaskStatus::Pending => stats.tasks_pending += 1,
                TaskStatus::Running => stats.tasks_running += 1,
                TaskStatus::Completed => stats.tasks_completed += 1,
                TaskStatus::Failed => stats.tasks_failed += 1,
                TaskStatus::Cancelled => stats.tasks_cancelled += 1,
            }
            stats.runs_total += task.total_runs as usize;
            stats.runs_passed += task.passed_runs as usize;
            stats.runs_failed += task.failed_runs as usize;
        }
        Ok(stats)
    }

    /// Spawn the worker pool against this engine.
    pub fn spawn_workers(&self, harness: Arc<dyn ExecutionHarness>) -> WorkerPool {
        WorkerPool::spawn(
            self.config.workers,
            WorkerDeps {
                store: self.store.clone(),
                queue: self.queue.clone(),
                harness,
                aggregator: self.aggregator.clone(),
                cancels: self.cancels.clone(),
                config: self.config.clone(),
            },
        )
    }

    /// Spawn the background reconcile sweep.
    pub fn spawn_reconciler(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.reconcile().await {
                            tracing::warn!(error = %e, "Reconcile sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// Spawn the periodic queue-depth publisher, the scaling signal feed.
    pub fn spawn_metrics_publisher(
        &self,
        sink: Arc<dyn MetricsSink>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        crate::metrics::spawn_queue_depth_publisher(
            self.queue.clone(),
            sink,
            self.config.metrics_interval,
            shutdown,
        )
    }

    /// The engine's store, for metric collection and inspection.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// The engine's queue, for metric collection and inspection.
    pub fn queue(&self) -> Arc<dyn WorkQueue> {
        self.queue.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use benchrun_core::RunStatus;

    fn engine() -> TaskEngine {
        TaskEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
            EngineConfig::default(),
        )
    }

    fn harness_config() -> HarnessConfig {
        HarnessConfig::new("ref", "openai/gpt-4o", "terminus-2", "harbor")
    }

    #[tokio::test]
    async fn test_submit_validates_run_count() {
        let engine = engine();
        let err = engine
            .submit("demo", harness_config(), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidRunCount { requested: 0, .. }
        ));

        let err = engine
            .submit("demo", harness_config(), 101)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidRunCount { requested: 101, max: 100 }
        ));
    }

    #[tokio::test]
    async fn test_submit_then_get_task() {
        let engine = engine();
        let task = engine.submit("demo", harness_config(), 5).await.unwrap();

        let detail = engine.get_task(&task.id).await.unwrap();
        assert_eq!(detail.task.id, task.id);
        assert!(detail.runs.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_task() {
        let engine = engine();
        let err = engine.get_task(&TaskId::new("nope")).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_embeds_runs_in_detail() {
        let engine = engine();
        let task = engine.submit("demo", harness_config(), 3).await.unwrap();
        engine.dispatch(&task.id).await.unwrap();

        let detail = engine.get_task(&task.id).await.unwrap();
        assert_eq!(detail.runs.len(), 3);
        assert!(detail.runs.iter().all(|r| r.status == RunStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancel_purges_queue_and_latches_status() {
        let engine = engine();
        let task = engine.submit("demo", harness_config(), 4).await.unwrap();
        engine.dispatch(&task.id).await.unwrap();
        assert_eq!(engine.queue().depth().await, 4);

        let cancelled = engine.cancel(&task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(engine.queue().depth().await, 0);

        // Cancelling again is a state error.
        let err = engine.cancel(&task.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTaskState { .. }));
    }

    #[tokio::test]
    async fn test_list_tasks_filters_and_orders() {
        let engine = engine();
        let a = engine.submit("a", harness_config(), 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = engine.submit("b", harness_config(), 1).await.unwrap();
        engine.dispatch(&b.id).await.unwrap();

        let all = engine.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].id, b.id);

        let running = engine
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Running),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id);

        let limited = engine
            .list_tasks(&TaskFilter {
                limit: Some(1),
                offset: 1,
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, a.id);
    }

    #[tokio::test]
    async fn test_stats_counts_tasks_and_runs() {
        let engine = engine();
        let task = engine.submit("demo", harness_config(), 2).await.unwrap();
        engine.dispatch(&task.id).await.unwrap();
        engine.submit("idle", harness_config(), 1).await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.tasks_total, 2);
        assert_eq!(stats.tasks_pending, 1);
        assert_eq!(stats.tasks_running, 1);
        assert_eq!(stats.runs_total, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_task_and_queue_items() {
        let engine = engine();
        let task = engine.submit("demo", harness_config(), 2).await.unwrap();
        engine.dispatch(&task.id).await.unwrap();

        engine.delete(&task.id).await.unwrap();
        assert!(matches!(
            engine.get_task(&task.id).await.unwrap_err(),
            EngineError::TaskNotFound(_)
        ));
        assert_eq!(engine.queue().depth().await, 0);
    }
}
