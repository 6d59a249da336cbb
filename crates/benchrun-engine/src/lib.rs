//! BenchRun Engine Library
//!
//! This crate provides the orchestration engine for BenchRun: task
//! fan-out, run claiming and execution, status aggregation, retry and
//! cancellation, and the queue-depth scaling signal.

pub mod aggregator;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod store;
pub mod worker;

pub use aggregator::StatusAggregator;
pub use cancel::CancelRegistry;
pub use config::EngineConfig;
pub use dispatcher::{DispatchError, DispatchReceipt, Dispatcher};
pub use metrics::{LogMetricsSink, MetricsSink};
pub use queue::{Delivery, MemoryQueue, QueueError, WorkQueue};
pub use service::{EngineError, EngineStats, TaskDetail, TaskEngine, TaskFilter};
pub use store::{ClaimOutcome, MemoryStore, Store, StoreError, TaskMutation};
pub use worker::WorkerPool;
