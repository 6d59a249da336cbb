//! Core domain errors.

use crate::{RunKey, TaskId};
use thiserror::Error;

/// Core domain errors for Benchrun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task not found.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Run not found.
    #[error("run not found: {0}")]
    RunNotFound(RunKey),

    /// Invalid state transition.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input rejected at submission.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
