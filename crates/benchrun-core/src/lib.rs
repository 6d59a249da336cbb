//! Benchrun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The async runtime
//! - Stores or queues
//! - The worker pool
//!
//! All types here represent the core business domain of Benchrun: one
//! benchmark Task fanned out into N independent trial Runs.

pub mod error;
pub mod harness;
pub mod ids;
pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use harness::{ExecutionHarness, HarnessConfig, HarnessError, HarnessReport};
pub use ids::{RunKey, TaskId, WorkerId};
pub use run::{Run, RunOutcome};
pub use status::{RunStatus, TaskStatus};
pub use task::Task;
