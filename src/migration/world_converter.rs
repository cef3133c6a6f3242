//! # World Converter
//!
//! Runs one migration pass as a [`Job`]. Tasks are enumerated when the
//! converter is created; they then run either on the calling thread, one per
//! [`Job::update`], or on a [`TaskManager`] worker pool whose reports are
//! drained by the caller.
//!
//! When the last task succeeds the converter flushes all staged regions,
//! saves the player file and patches the indices document. The first
//! failure stops the pass: queued tasks are discarded, running ones finish,
//! and nothing is flushed.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{error, info, warn};

use super::convert_task::{ConvertTask, ScheduledConvertTask};
use super::{ConvertContext, ConvertMode};
use crate::error::{Result, StorageError};
use crate::storage::{RegionLayerId, REGION_FORMAT_VERSION};
use crate::task_management::{TaskManager, TaskOutcome, TaskReport};
use crate::voxels::PlayerFile;

/// A long running piece of work driven by its owner.
pub trait Job {
    /// Whether the job still has work to do.
    fn is_active(&self) -> bool;
    /// Units of work the job consists of.
    fn work_total(&self) -> usize;
    /// Units of work finished so far.
    fn work_done(&self) -> usize;
    /// Makes progress without blocking on other threads.
    fn update(&mut self) -> Result<()>;
    /// Stops the job between tasks, discarding what is left.
    fn terminate(&mut self);
    /// Blocks until the job has finished or failed.
    fn wait_for_end(&mut self) -> Result<()>;
}

/// Runs one migration pass over a world.
pub struct WorldConverter {
    context: Arc<ConvertContext>,
    mode: ConvertMode,
    tasks: VecDeque<ConvertTask>,
    manager: Option<TaskManager>,
    work_total: usize,
    work_done: usize,
    active: bool,
    failed: bool,
}

impl WorldConverter {
    /// Enumerates the tasks of `mode` for the world in `context`.
    ///
    /// With `worker_threads` above 1 the tasks run on a worker pool,
    /// otherwise on the thread calling [`Job::update`].
    pub fn new(
        context: Arc<ConvertContext>,
        mode: ConvertMode,
        worker_threads: usize,
    ) -> Result<Self> {
        let tasks = enumerate_tasks(&context, mode)?;
        info!("Starting {} pass with {} tasks", mode, tasks.len());
        let manager = (worker_threads > 1 && tasks.len() > 1)
            .then(|| TaskManager::new(worker_threads.min(tasks.len())));
        Ok(Self {
            context,
            mode,
            work_total: tasks.len(),
            tasks,
            manager,
            work_done: 0,
            active: true,
            failed: false,
        })
    }

    /// Pass this converter runs.
    pub fn mode(&self) -> ConvertMode {
        self.mode
    }

    /// Whether a task of this pass failed.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Tasks not handed out yet.
    pub fn pending(&self) -> &VecDeque<ConvertTask> {
        &self.tasks
    }

    fn fail(&mut self, task: String, err: StorageError) -> StorageError {
        error!("Task '{}' failed: {}", task, err);
        self.failed = true;
        self.terminate();
        StorageError::TaskFailure {
            task,
            source: Box::new(err),
        }
    }

    fn handle_reports(&mut self, reports: Vec<TaskReport>) -> Result<()> {
        let mut failure = None;
        for report in reports {
            match report.outcome {
                TaskOutcome::Done => self.work_done += 1,
                TaskOutcome::Skipped => warn!("Skipped task '{}'", report.name),
                TaskOutcome::Failed(err) => {
                    if failure.is_none() {
                        failure = Some((report.name, err));
                    } else {
                        error!("Task '{}' failed: {}", report.name, err);
                    }
                }
            }
        }
        match failure {
            Some((name, err)) => Err(self.fail(name, err)),
            None => Ok(()),
        }
    }

    fn step(&mut self, block: bool) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        match self.manager.as_mut() {
            None => {
                if let Some(task) = self.tasks.pop_front() {
                    if let Err(err) = task.run(&self.context) {
                        return Err(self.fail(task.to_string(), err));
                    }
                    self.work_done += 1;
                }
            }
            Some(manager) => {
                while let Some(task) = self.tasks.pop_front() {
                    let scheduled = ScheduledConvertTask::new(task, self.context.clone());
                    manager.publish_task(Box::new(scheduled));
                }
                let reports = if block {
                    manager.wait_completed_tasks()
                } else {
                    manager.process_completed_tasks()
                };
                self.handle_reports(reports)?;
            }
        }

        let idle = self.manager.as_ref().map_or(true, TaskManager::is_idle);
        if self.tasks.is_empty() && idle {
            self.finish()?;
        }
        Ok(())
    }

    /// Flushes the pass once every task succeeded.
    fn finish(&mut self) -> Result<()> {
        self.active = false;
        self.manager = None;
        self.context.regions.write_all()?;
        if let Some(player) = self.context.player.lock().unwrap().as_ref() {
            player.save(&self.context.world_dir)?;
        }
        self.context.patch_indices(self.mode)?;
        info!(
            "Finished {} pass: {} of {} tasks",
            self.mode, self.work_done, self.work_total
        );
        Ok(())
    }
}

impl Job for WorldConverter {
    fn is_active(&self) -> bool {
        self.active
    }

    fn work_total(&self) -> usize {
        self.work_total
    }

    fn work_done(&self) -> usize {
        self.work_done
    }

    fn update(&mut self) -> Result<()> {
        self.step(false)
    }

    fn terminate(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let discarded = self.tasks.len();
        self.tasks.clear();
        if let Some(manager) = self.manager.as_mut() {
            manager.stop();
            // let running tasks finish so nothing touches the regions afterwards
            while !manager.is_idle() {
                for report in manager.wait_completed_tasks() {
                    if let TaskOutcome::Failed(err) = report.outcome {
                        error!("Task '{}' failed: {}", report.name, err);
                    }
                }
            }
        }
        self.manager = None;
        info!(
            "Terminated {} pass, {} tasks discarded",
            self.mode, discarded
        );
    }

    fn wait_for_end(&mut self) -> Result<()> {
        while self.active {
            self.step(true)?;
        }
        Ok(())
    }
}

fn enumerate_tasks(context: &ConvertContext, mode: ConvertMode) -> Result<VecDeque<ConvertTask>> {
    let regions = &context.regions;
    let report = &context.report;
    let mut tasks = VecDeque::new();
    match mode {
        ConvertMode::Upgrade => {
            for layer in RegionLayerId::ALL {
                for key in regions.list_regions(layer)? {
                    let version = regions.region_file_version(layer, key)?;
                    if version.is_some_and(|version| version < REGION_FORMAT_VERSION) {
                        tasks.push_back(ConvertTask::region(mode, layer, key));
                    }
                }
            }
        }
        ConvertMode::Reindex => {
            if report.blocks.has_content_reorder() {
                for key in regions.list_regions(RegionLayerId::Voxels)? {
                    tasks.push_back(ConvertTask::region(mode, RegionLayerId::Voxels, key));
                }
            }
            if report.items.has_content_reorder() {
                for key in regions.list_regions(RegionLayerId::Inventories)? {
                    tasks.push_back(ConvertTask::region(mode, RegionLayerId::Inventories, key));
                }
                if PlayerFile::path(&context.world_dir).exists() {
                    tasks.push_back(ConvertTask::player(mode));
                }
            }
        }
        ConvertMode::BlockFields => {
            for key in regions.list_regions(RegionLayerId::BlocksData)? {
                tasks.push_back(ConvertTask::region(mode, RegionLayerId::BlocksData, key));
            }
        }
    }
    Ok(tasks)
}
