//! The execution harness seam.
//!
//! The harness is the external component that actually performs one
//! benchmark trial inside an isolated container and returns a verdict. It
//! is opaque to this core beyond the typed contract below, and may be slow,
//! crash, or hang - callers wrap every invocation in a hard timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Per-run execution budget if a task does not specify one (seconds).
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 1200;

/// Harness configuration carried by a task and handed to every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Opaque reference to the uploaded task archive. Resolution is the
    /// harness's concern; this core never opens it.
    pub archive_ref: String,

    /// Model identifier (e.g. "openai/gpt-4o").
    pub model: String,

    /// Agent identifier (e.g. "terminus-2").
    pub agent: String,

    /// Harness identifier (e.g. "harbor").
    pub harness: String,

    /// Per-run execution budget in seconds.
    pub timeout_seconds: u64,
}

impl HarnessConfig {
    /// Create a config with the default timeout budget.
    pub fn new(
        archive_ref: impl Into<String>,
        model: impl Into<String>,
        agent: impl Into<String>,
        harness: impl Into<String>,
    ) -> Self {
        Self {
            archive_ref: archive_ref.into(),
            model: model.into(),
            agent: agent.into(),
            harness: harness.into(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    /// Builder method to override the timeout budget.
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// The per-run budget as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Verdict returned by a harness invocation that ran to completion.
///
/// `success` decides passed vs. failed; an unreturned or errored invocation
/// never produces a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    /// Whether the trial's test suite passed.
    pub success: bool,

    /// Total number of tests executed.
    pub tests_total: u32,

    /// Number of tests that passed.
    pub tests_passed: u32,

    /// Number of tests that failed.
    pub tests_failed: u32,

    /// Captured harness output.
    pub logs: String,

    /// Harness-reported error detail, if any.
    pub error_message: Option<String>,

    /// Wall-clock duration of the trial in seconds.
    pub duration_seconds: f64,
}

/// Errors raised when the harness invocation itself fails - distinct from a
/// trial whose tests did not pass.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The harness could not be started at all.
    #[error("harness unavailable: {0}")]
    Unavailable(String),

    /// The harness started but crashed before producing a verdict.
    #[error("harness crashed: {0}")]
    Crashed(String),
}

/// External component that performs one benchmark trial.
#[async_trait]
pub trait ExecutionHarness: Send + Sync {
    /// Execute one trial for the given configuration.
    ///
    /// `seed` distinguishes independent trials of the same task (the run
    /// number is used). Implementations may block for a long time; the
    /// caller enforces the timeout budget.
    async fn execute(
        &self,
        config: &HarnessConfig,
        seed: u64,
    ) -> Result<HarnessReport, HarnessError>;
}
