//! Queue-depth publishing and Prometheus metrics formatting.
//!
//! The queue-depth gauge counts work-items not yet in a terminal state
//! (undelivered plus in-flight) and is published on a fixed cadence. An
//! external autoscaler consumes that single gauge as its scaling signal.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use benchrun_core::TaskStatus;

use crate::queue::WorkQueue;
use crate::store::Store;

/// Destination for the periodic queue-depth sample.
pub trait MetricsSink: Send + Sync {
    fn record_queue_depth(&self, depth: usize);
}

/// Sink that emits the sample as a structured log line.
#[derive(Debug, Default)]
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn record_queue_depth(&self, depth: usize) {
        debug!(queue_depth = depth, "Queue depth sampled");
    }
}

/// Spawn the periodic queue-depth publisher.
///
/// Sampling failures are logged and skipped; the cadence itself never
/// stops until shutdown.
pub fn spawn_queue_depth_publisher(
    queue: Arc<dyn WorkQueue>,
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let depth = queue.depth().await;
                    sink.record_queue_depth(depth);
                }
            }
        }
    })
}

/// Collect engine metrics and format as Prometheus text.
pub async fn collect_metrics(store: &Arc<dyn Store>, queue: &Arc<dyn WorkQueue>) -> String {
    let mut output = String::new();

    collect_queue_metrics(queue, &mut output).await;
    collect_task_metrics(store, &mut output).await;

    output
}

/// The scaling signal: work-items awaiting or undergoing execution.
async fn collect_queue_metrics(queue: &Arc<dyn WorkQueue>, output: &mut String) {
    let depth = queue.depth().await;

    writeln!(
        output,
        "# HELP benchrun_queue_depth Work-items not yet in a terminal state"
    )
    .ok();
    writeln!(output, "# TYPE benchrun_queue_depth gauge").ok();
    writeln!(output, "benchrun_queue_depth {depth}").ok();
}

/// Collect task and run metrics by status.
async fn collect_task_metrics(store: &Arc<dyn Store>, output: &mut String) {
    let tasks = match store.list_tasks().await {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(error = %e, "Metrics collection failed to list tasks");
            return;
        }
    };

    // Count tasks by status
    let mut pending = 0u64;
    let mut running = 0u64;
    let mut completed = 0u64;
    let mut failed = 0u64;
    let mut cancelled = 0u64;
    let mut runs_passed = 0u64;
    let mut runs_failed = 0u64;

    for task in &tasks {
        match task.status {
            TaskStatus::Pending => pending += 1,
            TaskStatus::Running => running += 1,
            TaskStatus::Completed => completed += 1,
            TaskStatus::Failed => failed += 1,
            TaskStatus::Cancelled => cancelled += 1,
        }
        runs_passed += task.passed_runs as u64;
        runs_failed += task.failed_runs as u64;
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP benchrun_tasks_total Total number of tasks by status"
    )
    .ok();
    writeln!(output, "# TYPE benchrun_tasks_total gauge").ok();
    writeln!(output, "benchrun_tasks_total{{status=\"pending\"}} {pending}").ok();
    writeln!(output, "benchrun_tasks_total{{status=\"running\"}} {running}").ok();
    writeln!(
        output,
        "benchrun_tasks_total{{status=\"completed\"}} {completed}"
    )
    .ok();
    writeln!(output, "benchrun_tasks_total{{status=\"failed\"}} {failed}").ok();
    writeln!(
        output,
        "benchrun_tasks_total{{status=\"cancelled\"}} {cancelled}"
    )
    .ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP benchrun_runs_total Total number of terminal runs by result"
    )
    .ok();
    writeln!(output, "# TYPE benchrun_runs_total gauge").ok();
    writeln!(
        output,
        "benchrun_runs_total{{result=\"passed\"}} {runs_passed}"
    )
    .ok();
    writeln!(
        output,
        "benchrun_runs_total{{result=\"failed\"}} {runs_failed}"
    )
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use benchrun_core::{HarnessConfig, RunKey, Task};

    #[tokio::test]
    async fn test_collect_metrics_empty_engine() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new());
        let output = collect_metrics(&store, &queue).await;

        assert!(output.contains("benchrun_queue_depth 0"));
        assert!(output.contains("benchrun_tasks_total{status=\"pending\"} 0"));
        assert!(output.contains("benchrun_runs_total{result=\"passed\"} 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts_queue_and_tasks() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new());

        let task = Task::new(
            "demo",
            HarnessConfig::new("ref", "openai/gpt-4o", "terminus-2", "harbor"),
            2,
        );
        let id = task.id.clone();
        store.create_task(task).await.unwrap();
        queue.enqueue(RunKey::new(id.clone(), 1)).await.unwrap();
        queue.enqueue(RunKey::new(id, 2)).await.unwrap();

        let output = collect_metrics(&store, &queue).await;
        assert!(output.contains("benchrun_queue_depth 2"));
        assert!(output.contains("benchrun_tasks_total{status=\"pending\"} 1"));
    }

    #[tokio::test]
    async fn test_publisher_samples_on_cadence() {
        struct CountingSink(std::sync::atomic::AtomicUsize);
        impl MetricsSink for CountingSink {
            fn record_queue_depth(&self, _depth: usize) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new());
        let sink = Arc::new(CountingSink(std::sync::atomic::AtomicUsize::new(0)));
        let shutdown = CancellationToken::new();

        let handle = spawn_queue_depth_publisher(
            queue,
            sink.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(55)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // First tick fires immediately; several more within the window.
        assert!(sink.0.load(std::sync::atomic::Ordering::SeqCst) >= 3);
    }
}
