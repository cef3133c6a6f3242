//! # Task Management System
//!
//! A small worker pool for executing independent tasks across threads while
//! a single consumer thread collects their results.
//!
//! ## Architecture Overview
//! - `TaskManager`: central coordinator for task distribution and result
//!   collection
//! - `Task`: a unit of work that can be executed on any worker
//! - `TaskReport`: the outcome of one task, sent back to the consumer
//! - `TaskChannel`: communication channel between the consumer and a worker
//!
//! ## Task Lifecycle
//! 1. Tasks are published via `TaskManager::publish_task()`
//! 2. The manager distributes them to worker channels using round-robin,
//!    queueing what does not fit
//! 3. Workers process tasks and send back reports
//! 4. Reports are collected on the consumer thread by
//!    `process_completed_tasks()` or `wait_completed_tasks()`
//!
//! ## Stopping
//! `stop()` raises a flag shared with all workers and drops the queue.
//! Workers check the flag before starting each task, so a task that already
//! started always runs to completion while later ones come back as
//! [`TaskOutcome::Skipped`].

pub mod task;

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info};

use crate::error::StorageError;
pub use task::{Task, TaskOutcome, TaskReport};

/// A communication channel between the consumer thread and one worker.
#[derive(Debug)]
pub struct TaskChannel {
    task_sender: Sender<Box<dyn Task>>,
    num_tasks_in_flight: usize,
    worker: JoinHandle<()>,
}

/// Manages a pool of worker threads and coordinates task execution.
pub struct TaskManager {
    channels: Vec<TaskChannel>,
    result_receiver: Receiver<TaskReport>,
    queued_tasks: VecDeque<Box<dyn Task>>,
    current_channel: usize,
    stopped: Arc<AtomicBool>,
}

/// Maximum number of tasks that can be in flight per worker channel.
///
/// Kept at 1 so that a stopped manager never has more than one started
/// task per worker left to wait for.
pub const MAX_TASKS_IN_FLIGHT: usize = 1;

fn run_task(task: &dyn Task) -> TaskOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| task.process())) {
        Ok(Ok(())) => TaskOutcome::Done,
        Ok(Err(err)) => TaskOutcome::Failed(err),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskOutcome::Failed(StorageError::TaskPanicked(message))
        }
    }
}

impl TaskManager {
    /// Creates a new `TaskManager` with `num_workers` worker threads.
    ///
    /// # Panics
    /// Panics if the underlying thread creation fails.
    pub fn new(num_workers: usize) -> Self {
        let mut channels = Vec::with_capacity(num_workers);
        let (result_tx, result_rx) = channel::<TaskReport>();
        let stopped = Arc::new(AtomicBool::new(false));

        for index in 0..num_workers {
            let (task_tx, task_rx) = channel::<Box<dyn Task>>();
            let result_tx = result_tx.clone();
            let stopped = stopped.clone();

            let task_closure = move || {
                while let Ok(task) = task_rx.recv() {
                    let outcome = if stopped.load(Ordering::SeqCst) {
                        TaskOutcome::Skipped
                    } else {
                        run_task(task.as_ref())
                    };
                    let report = TaskReport {
                        channel: index,
                        name: task.name(),
                        outcome,
                    };
                    if result_tx.send(report).is_err() {
                        break;
                    }
                }
            };

            let worker = thread::Builder::new()
                .name(format!("storage-worker-{index}"))
                .spawn(task_closure)
                .expect("failed to spawn worker thread");

            channels.push(TaskChannel {
                task_sender: task_tx,
                num_tasks_in_flight: 0,
                worker,
            });
        }
        info!("Started {} storage worker threads", num_workers);

        TaskManager {
            channels,
            result_receiver: result_rx,
            queued_tasks: VecDeque::new(),
            current_channel: 0,
            stopped,
        }
    }

    /// Attempts to send a task to a specific worker channel, returning the
    /// task back if the worker is gone.
    fn try_send_task(
        &mut self,
        task: Box<dyn Task>,
        channel_idx: usize,
    ) -> Result<(), Box<dyn Task>> {
        match self.channels[channel_idx].task_sender.send(task) {
            Ok(_) => {
                self.channels[channel_idx].num_tasks_in_flight += 1;
                Ok(())
            }
            Err(task) => Err(task.0),
        }
    }

    /// Finds a worker channel that can accept a new task, round-robin from
    /// the last used channel.
    fn find_available_channel(&self) -> Option<usize> {
        if self.channels.is_empty() {
            return None;
        }
        let start_channel = self.current_channel;
        let mut current = start_channel;
        loop {
            if self.channels[current].num_tasks_in_flight < MAX_TASKS_IN_FLIGHT {
                return Some(current);
            }
            current = (current + 1) % self.channels.len();
            if current == start_channel {
                return None;
            }
        }
    }

    /// Publishes a new task for execution.
    ///
    /// # Returns
    /// - `true` if the task was immediately handed to a worker
    /// - `false` if it was queued because all workers are busy, or dropped
    ///   because the manager was stopped
    pub fn publish_task(&mut self, task: Box<dyn Task>) -> bool {
        if self.is_stopped() {
            debug!("Dropping task '{}' published after stop", task.name());
            return false;
        }
        match self.find_available_channel() {
            Some(channel_idx) => match self.try_send_task(task, channel_idx) {
                Ok(_) => {
                    self.current_channel = (channel_idx + 1) % self.channels.len();
                    true
                }
                Err(task) => {
                    self.queued_tasks.push_back(task);
                    false
                }
            },
            None => {
                self.queued_tasks.push_back(task);
                false
            }
        }
    }

    /// Hands queued tasks to workers while any worker is available.
    pub fn process_queued_tasks(&mut self) {
        while !self.queued_tasks.is_empty() {
            let Some(channel_idx) = self.find_available_channel() else {
                break;
            };
            let Some(task) = self.queued_tasks.pop_front() else {
                break;
            };
            match self.try_send_task(task, channel_idx) {
                Ok(_) => self.current_channel = (channel_idx + 1) % self.channels.len(),
                Err(task) => {
                    // Channel is disconnected, put task back and stop processing
                    self.queued_tasks.push_front(task);
                    break;
                }
            }
        }
    }

    fn complete(&mut self, report: &TaskReport) {
        if let Some(channel) = self.channels.get_mut(report.channel) {
            channel.num_tasks_in_flight = channel.num_tasks_in_flight.saturating_sub(1);
        }
    }

    /// Collects every report that is ready, without blocking.
    pub fn process_completed_tasks(&mut self) -> Vec<TaskReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.result_receiver.try_recv() {
            self.complete(&report);
            reports.push(report);
        }
        self.process_queued_tasks();
        reports
    }

    /// Blocks until at least one report is ready, then collects all ready
    /// reports. Returns nothing when no task is in flight.
    pub fn wait_completed_tasks(&mut self) -> Vec<TaskReport> {
        if self.tasks_in_flight() == 0 {
            return Vec::new();
        }
        let mut reports = Vec::new();
        if let Ok(report) = self.result_receiver.recv() {
            self.complete(&report);
            reports.push(report);
        }
        reports.extend(self.process_completed_tasks());
        reports
    }

    /// Tasks handed to workers and not reported yet.
    pub fn tasks_in_flight(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| channel.num_tasks_in_flight)
            .sum()
    }

    /// Tasks waiting for a free worker.
    pub fn queued_count(&self) -> usize {
        self.queued_tasks.len()
    }

    /// Whether every published task has been reported back.
    pub fn is_idle(&self) -> bool {
        self.queued_tasks.is_empty() && self.tasks_in_flight() == 0
    }

    /// Stops claiming new tasks and discards the queue. Tasks already
    /// running finish normally.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        let discarded = self.queued_tasks.len();
        self.queued_tasks.clear();
        if discarded > 0 {
            info!("Discarded {} queued tasks", discarded);
        }
    }

    /// Whether [`TaskManager::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.channels.len()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.stop();
        for channel in self.channels.drain(..) {
            let TaskChannel {
                task_sender,
                worker,
                ..
            } = channel;
            drop(task_sender);
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::error::Result;

    struct CountTask {
        counter: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Task for CountTask {
        fn name(&self) -> String {
            "count".to_string()
        }

        fn process(&self) -> Result<()> {
            thread::sleep(Duration::from_millis(2));
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StorageError::InvalidInput("boom".to_string()));
            }
            Ok(())
        }
    }

    struct PanicTask;

    impl Task for PanicTask {
        fn name(&self) -> String {
            "panic".to_string()
        }

        fn process(&self) -> Result<()> {
            panic!("worker exploded");
        }
    }

    fn drain(manager: &mut TaskManager) -> Vec<TaskReport> {
        let mut reports = Vec::new();
        while !manager.is_idle() {
            reports.extend(manager.wait_completed_tasks());
        }
        reports
    }

    #[test]
    fn all_tasks_are_reported_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut manager = TaskManager::new(3);
        for _ in 0..20 {
            manager.publish_task(Box::new(CountTask {
                counter: counter.clone(),
                fail: false,
            }));
        }
        assert!(manager.queued_count() > 0);

        let reports = drain(&mut manager);
        assert_eq!(reports.len(), 20);
        assert!(reports
            .iter()
            .all(|report| matches!(report.outcome, TaskOutcome::Done)));
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn stop_discards_the_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut manager = TaskManager::new(2);
        for index in 0..10 {
            manager.publish_task(Box::new(CountTask {
                counter: counter.clone(),
                fail: index == 0,
            }));
        }
        manager.stop();
        assert_eq!(manager.queued_count(), 0);

        let reports = drain(&mut manager);
        assert!(reports.len() <= 2);
        assert!(counter.load(Ordering::SeqCst) <= 2);
        assert!(!manager.publish_task(Box::new(CountTask {
            counter: counter.clone(),
            fail: false,
        })));
    }

    #[test]
    fn panics_become_failures() {
        let mut manager = TaskManager::new(1);
        manager.publish_task(Box::new(PanicTask));
        let reports = drain(&mut manager);
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            &reports[0].outcome,
            TaskOutcome::Failed(StorageError::TaskPanicked(message)) if message == "worker exploded"
        ));
    }
}
