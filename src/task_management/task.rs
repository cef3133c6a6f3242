//! # Task System Core Traits
//!
//! ## Core Components
//! - `Task`: a unit of work executed on a worker thread
//! - `TaskReport`: what the worker sends back once a task is over
//!
//! ## Task Lifecycle
//! 1. A `Task` is published via `TaskManager::publish_task()`
//! 2. Unless the manager was stopped, `process()` runs on a worker thread
//! 3. The worker sends a `TaskReport` back to the consumer thread
//! 4. `TaskManager::process_completed_tasks()` hands the reports out
//!
//! Tasks own everything they need (shared state behind an `Arc`), so they
//! can be moved to any worker.

use crate::error::{Result, StorageError};

/// A unit of work that can be executed on a worker thread.
///
/// Tasks are consumed exactly once and never retried; a failure is
/// reported back, not handled by the worker.
pub trait Task: Send {
    /// Human readable description used in logs and failure reports.
    fn name(&self) -> String;

    /// Performs the work.
    fn process(&self) -> Result<()>;
}

/// How a published task ended.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The task returned `Ok`.
    Done,
    /// The task returned an error or panicked.
    Failed(StorageError),
    /// The manager was stopped before the task was started.
    Skipped,
}

/// Sent back by a worker for every task it received.
#[derive(Debug)]
pub struct TaskReport {
    pub(super) channel: usize,
    /// Name of the finished task.
    pub name: String,
    /// How it ended.
    pub outcome: TaskOutcome,
}

impl TaskReport {
    /// Whether the task returned an error.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }
}
