//! The Task record: one benchmark submission requesting N trial runs.

use crate::{HarnessConfig, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Task is one benchmark submission, fanned out into
/// `requested_run_count` independent Runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Human-readable task name.
    pub name: String,

    /// Number of trial runs requested. Fixed at creation, >= 1.
    pub requested_run_count: u32,

    /// Harness configuration shared by every run of this task.
    pub config: HarnessConfig,

    /// Current task status.
    pub status: TaskStatus,

    /// When the task was submitted.
    pub created_at: DateTime<Utc>,

    /// When dispatch completed and the task entered `running`.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Count of Run rows belonging to this task. Derived from run records,
    /// never decremented except on full task deletion.
    pub total_runs: u32,

    /// Count of runs whose terminal state is `passed`.
    pub passed_runs: u32,

    /// Count of runs whose terminal state is anything other than `passed`.
    pub failed_runs: u32,
}

impl Task {
    /// Create a new pending Task.
    pub fn new(name: impl Into<String>, config: HarnessConfig, requested_run_count: u32) -> Self {
        Self {
            id: TaskId::generate(),
            name: name.into(),
            requested_run_count,
            config,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_runs: 0,
            passed_runs: 0,
            failed_runs: 0,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Count of runs that have reached a terminal state.
    pub fn terminal_runs(&self) -> u32 {
        self.passed_runs + self.failed_runs
    }
}
