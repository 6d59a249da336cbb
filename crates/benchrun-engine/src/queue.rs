//! At-least-once work queue carrying run work-items to workers.
//!
//! Delivery moves an item into the in-flight set; only an ack removes it.
//! Depth counts undelivered plus in-flight items - that sum is the scaling
//! signal. The queue makes no exactly-once promise: duplicate deliveries
//! are expected and neutralised by the claim CAS in the store.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

use benchrun_core::{RunKey, TaskId};

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// One delivery of a work-item. Holds a tag so the same key delivered twice
/// can be acked independently.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub key: RunKey,
    tag: u64,
}

/// At-least-once delivery channel for run work-items.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue one work-item.
    async fn enqueue(&self, key: RunKey) -> Result<(), QueueError>;

    /// Wait for the next work-item. Cancel-safe: dropping the future before
    /// it resolves leaves the queue untouched.
    async fn pull(&self) -> Delivery;

    /// Acknowledge a delivery, removing it from the in-flight set.
    async fn ack(&self, delivery: &Delivery);

    /// Undelivered plus in-flight item count - the scaling signal.
    async fn depth(&self) -> usize;

    /// Whether an undelivered or in-flight item exists for the key.
    async fn contains(&self, key: &RunKey) -> bool;

    /// Best-effort removal of undelivered items for a task. In-flight
    /// deliveries are unaffected; a worker that already pulled one may
    /// still act on it.
    async fn remove_task_items(&self, task_id: &TaskId) -> usize;
}

#[derive(Default)]
struct QueueInner {
    ready: VecDeque<RunKey>,
    in_flight: HashMap<u64, RunKey>,
    next_tag: u64,
}

/// In-memory reference queue.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, key: RunKey) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.ready.push_back(key);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn pull(&self) -> Delivery {
        loop {
            // Register for notification before checking, so an enqueue
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(key) = inner.ready.pop_front() {
                    let tag = inner.next_tag;
                    inner.next_tag += 1;
                    inner.in_flight.insert(tag, key.clone());
                    return Delivery { key, tag };
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.in_flight.remove(&delivery.tag);
    }

    async fn depth(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.ready.len() + inner.in_flight.len()
    }

    async fn contains(&self, key: &RunKey) -> bool {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.ready.iter().any(|k| k == key) || inner.in_flight.values().any(|k| k == key)
    }

    async fn remove_task_items(&self, task_id: &TaskId) -> usize {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let before = inner.ready.len();
        inner.ready.retain(|k| &k.task_id != task_id);
        before - inner.ready.len()
    }
}
