//! Status aggregation: task counters and status from run terminal states.
//!
//! Triggered synchronously after every terminal run write. The whole
//! recomputation happens inside one atomic task update, so concurrent runs
//! of the same task finishing simultaneously cannot lose counter updates.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use benchrun_core::{Run, RunStatus, Task, TaskId, TaskStatus};

use crate::store::{Store, StoreError};

/// Recomputes task counters and status whenever a run reaches a terminal
/// state.
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn Store>,
}

impl StatusAggregator {
    /// Create a new StatusAggregator.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recompute the owning task's counters from the current run multiset
    /// and apply the completion transition if every run is terminal.
    pub async fn on_run_terminal(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        let task = self
            .store
            .update_task(task_id, Box::new(|task, runs| apply_aggregation(task, runs)))
            .await?;

        if task.is_terminal() {
            info!(
                task_id = %task.id,
                status = ?task.status,
                total = task.total_runs,
                passed = task.passed_runs,
                failed = task.failed_runs,
                "Task reached terminal status"
            );
        }
        Ok(task)
    }
}

/// Pure reduction of a task row from the multiset of its run statuses.
///
/// Counters are recomputed, not incremented, so the result is always
/// derivable from the run rows alone. A cancelled task keeps its status:
/// late terminal writes update counters but never revive the task.
pub(crate) fn apply_aggregation(task: &mut Task, runs: &[Run]) {
    let total = runs.len() as u32;
    let passed = runs
        .iter()
        .filter(|r| r.status == RunStatus::Passed)
        .count() as u32;
    let failed = runs
        .iter()
        .filter(|r| r.status.counts_as_failed())
        .count() as u32;

    task.total_runs = total;
    task.passed_runs = passed;
    task.failed_runs = failed;

    if task.status == TaskStatus::Cancelled {
        return;
    }

    let all_terminal = total > 0 && passed + failed == total;
    if all_terminal {
        let all_error = runs.iter().all(|r| r.status == RunStatus::Error);
        task.status = if all_error {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        if task.completed_at.is_none() {
            task.completed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchrun_core::{HarnessConfig, RunOutcome, RunKey, WorkerId};
    use crate::store::MemoryStore;

    fn task(n: u32) -> Task {
        let mut t = Task::new(
            "demo",
            HarnessConfig::new("ref", "openai/gpt-4o", "terminus-2", "harbor"),
            n,
        );
        t.status = TaskStatus::Running;
        t
    }

    fn run_with(task_id: &TaskId, n: u32, status: RunStatus) -> Run {
        let mut r = Run::new(task_id.clone(), n);
        r.status = status;
        r
    }

    #[test]
    fn test_eight_passed_two_failed_completes() {
        let mut t = task(10);
        let runs: Vec<Run> = (1..=10)
            .map(|i| {
                let status = if i <= 8 {
                    RunStatus::Passed
                } else {
                    RunStatus::Failed
                };
                run_with(&t.id, i, status)
            })
            .collect();

        apply_aggregation(&mut t, &runs);
        assert_eq!(t.total_runs, 10);
        assert_eq!(t.passed_runs, 8);
        assert_eq!(t.failed_runs, 2);
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_timeout_counts_as_failed_and_task_completes() {
        let mut t = task(3);
        let runs = vec![
            run_with(&t.id, 1, RunStatus::Passed),
            run_with(&t.id, 2, RunStatus::Timeout),
            run_with(&t.id, 3, RunStatus::Passed),
        ];
        apply_aggregation(&mut t, &runs);
        assert_eq!(t.failed_runs, 1);
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[test]
    fn test_all_error_means_failed_task() {
        let mut t = task(2);
        let runs = vec![
            run_with(&t.id, 1, RunStatus::Error),
            run_with(&t.id, 2, RunStatus::Error),
        ];
        apply_aggregation(&mut t, &runs);
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.failed_runs, 2);
    }

    #[test]
    fn test_all_failed_is_still_completed() {
        let mut t = task(2);
        let runs = vec![
            run_with(&t.id, 1, RunStatus::Failed),
            run_with(&t.id, 2, RunStatus::Failed),
        ];
        apply_aggregation(&mut t, &runs);
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.passed_runs, 0);
    }

    #[test]
    fn test_partial_terminal_stays_running() {
        let mut t = task(3);
        let runs = vec![
            run_with(&t.id, 1, RunStatus::Passed),
            run_with(&t.id, 2, RunStatus::Running),
            run_with(&t.id, 3, RunStatus::Pending),
        ];
        apply_aggregation(&mut t, &runs);
        assert_eq!(t.status, TaskStatus::Running);
        assert_eq!(t.passed_runs, 1);
    }

    #[test]
    fn test_cancelled_task_keeps_status_but_counters_update() {
        let mut t = task(2);
        t.status = TaskStatus::Cancelled;
        let runs = vec![
            run_with(&t.id, 1, RunStatus::Passed),
            run_with(&t.id, 2, RunStatus::Passed),
        ];
        apply_aggregation(&mut t, &runs);
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert_eq!(t.passed_runs, 2);
    }

    #[tokio::test]
    async fn test_on_run_terminal_updates_stored_task() {
        let store = Arc::new(MemoryStore::new());
        let mut t = task(1);
        t.total_runs = 1;
        let id = t.id.clone();
        store.create_task(t).await.unwrap();
        store
            .create_runs(vec![Run::new(id.clone(), 1)])
            .await
            .unwrap();

        let key = RunKey::new(id.clone(), 1);
        let worker = WorkerId::new("w1");
        store.claim_run(&key, &worker).await.unwrap();
        store
            .write_terminal(
                &key,
                &worker,
                RunOutcome::from_report(benchrun_core::HarnessReport {
                    success: true,
                    tests_total: 1,
                    tests_passed: 1,
                    tests_failed: 0,
                    logs: String::new(),
                    error_message: None,
                    duration_seconds: 1.0,
                }),
            )
            .await
            .unwrap();

        let aggregator = StatusAggregator::new(store.clone());
        let updated = aggregator.on_run_terminal(&id).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.passed_runs, 1);
    }
}
