//! Per-task cancellation tokens.
//!
//! Cancellation is cooperative: firing a task's token tells workers to
//! abandon in-flight harness calls for that task. Tokens for cancelled
//! tasks are kept so late lookups still observe the cancelled state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use benchrun_core::TaskId;

/// Registry of per-task cancellation tokens.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a task, created on first use.
    pub fn token_for(&self, task_id: &TaskId) -> CancellationToken {
        let mut map = self.inner.lock().expect("cancel registry lock poisoned");
        map.entry(task_id.clone()).or_default().clone()
    }

    /// Fire the task's token.
    pub fn cancel(&self, task_id: &TaskId) {
        self.token_for(task_id).cancel();
    }

    /// Drop the task's token (full task deletion).
    pub fn remove(&self, task_id: &TaskId) {
        let mut map = self.inner.lock().expect("cancel registry lock poisoned");
        map.remove(task_id);
    }
}
