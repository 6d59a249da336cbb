//! Status enums for Tasks and Runs.

use serde::{Deserialize, Serialize};

/// Status of a Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task created but not yet dispatched.
    #[default]
    Pending,
    /// Task dispatched; runs are queued or executing.
    Running,
    /// Every run reached a terminal state. Pass rate is carried in the
    /// counters, not the status.
    Completed,
    /// Every run ended in `error` - the harness-invocation layer itself
    /// failed for all runs.
    Failed,
    /// Task was cancelled by explicit operator action.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of an individual Run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run created by the dispatcher, waiting for a worker claim.
    #[default]
    Pending,
    /// Run exclusively claimed by a worker and executing.
    Running,
    /// Harness completed and the trial's tests passed.
    Passed,
    /// Harness completed but the trial's tests did not pass. Not an error
    /// path.
    Failed,
    /// The harness invocation itself failed (infrastructure error).
    Error,
    /// The harness did not return within the configured budget.
    Timeout,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state. Terminal states are
    /// final - no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Error | Self::Timeout)
    }

    /// Returns true if the run is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this terminal state counts toward the task's
    /// `failed_runs` counter. Every non-passed terminal state does; the
    /// original per-run status is preserved for display.
    pub fn counts_as_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::Error | Self::Timeout)
    }
}
