//! The Run record: one independent trial of a Task.

use crate::{HarnessReport, RunKey, RunStatus, TaskId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One independent trial execution of a Task.
///
/// Run rows are mutated only by their claim holder after the initial claim
/// CAS; there is no run-row contention beyond that CAS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Owning task.
    pub task_id: TaskId,

    /// Run number within the task, 1..N. Unique, stable, never reused.
    pub run_number: u32,

    /// Current run status.
    pub status: RunStatus,

    /// Worker holding the claim on this run, set by the claim CAS.
    pub claimed_by: Option<WorkerId>,

    /// When the dispatcher created this run.
    pub created_at: DateTime<Utc>,

    /// When a worker claimed the run.
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached its terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock duration of the harness invocation in seconds.
    pub duration_seconds: Option<f64>,

    /// Total number of tests executed by the harness.
    pub tests_total: u32,

    /// Number of tests that passed.
    pub tests_passed: u32,

    /// Number of tests that failed.
    pub tests_failed: u32,

    /// Captured harness output, truncated by the worker.
    pub logs: Option<String>,

    /// Error detail for `error` and `timeout` runs.
    pub error_message: Option<String>,
}

impl Run {
    /// Create a new pending Run.
    pub fn new(task_id: TaskId, run_number: u32) -> Self {
        Self {
            task_id,
            run_number,
            status: RunStatus::Pending,
            claimed_by: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            tests_total: 0,
            tests_passed: 0,
            tests_failed: 0,
            logs: None,
            error_message: None,
        }
    }

    /// The composite idempotency key of this run.
    pub fn key(&self) -> RunKey {
        RunKey::new(self.task_id.clone(), self.run_number)
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The one-shot payload of a terminal write.
///
/// A worker builds exactly one outcome per claimed run; the store applies
/// it exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Terminal status. Always one of passed/failed/error/timeout.
    pub status: RunStatus,

    pub tests_total: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,

    /// Captured harness output.
    pub logs: Option<String>,

    /// Error detail for error/timeout outcomes.
    pub error_message: Option<String>,

    /// Wall-clock duration in seconds.
    pub duration_seconds: Option<f64>,
}

impl RunOutcome {
    /// Outcome for a harness invocation that ran to completion: `passed` if
    /// the trial's tests passed, `failed` otherwise.
    pub fn from_report(report: HarnessReport) -> Self {
        Self {
            status: if report.success {
                RunStatus::Passed
            } else {
                RunStatus::Failed
            },
            tests_total: report.tests_total,
            tests_passed: report.tests_passed,
            tests_failed: report.tests_failed,
            logs: Some(report.logs),
            error_message: report.error_message,
            duration_seconds: Some(report.duration_seconds),
        }
    }

    /// Outcome for an infrastructure failure of the harness invocation.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            tests_total: 0,
            tests_passed: 0,
            tests_failed: 0,
            logs: None,
            error_message: Some(message.into()),
            duration_seconds: None,
        }
    }

    /// Outcome for a harness invocation that exceeded its budget.
    pub fn timeout(budget_seconds: u64) -> Self {
        Self {
            status: RunStatus::Timeout,
            tests_total: 0,
            tests_passed: 0,
            tests_failed: 0,
            logs: None,
            error_message: Some(format!(
                "harness did not return within {budget_seconds}s budget"
            )),
            duration_seconds: Some(budget_seconds as f64),
        }
    }
}
