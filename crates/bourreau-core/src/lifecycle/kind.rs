//! TaskKind: the stage hooks of one task type.
//!
//! The engine owns transitions; a kind only answers "did the stage work"
//! and produces the commands to run on the cluster. Recovery and restart
//! hooks default to refusing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use super::paths::TaskPaths;
use super::registry::TaskKindRegistry;
use crate::domain::{TaskId, TaskRecord, TaskStatus};
use crate::driver::ControlAction;
use crate::error::{HookError, StoreError};
use crate::ports::{Clock, FileCache, TaskStore};

/// How many times `update_task` retries a conflicting save.
const UPDATE_RETRIES: usize = 5;

/// What a hook gets to work with.
pub struct StageContext<'a> {
    pub task: &'a mut TaskRecord,
    pub paths: TaskPaths,
    store: &'a dyn TaskStore,
    files: &'a dyn FileCache,
    clock: &'a dyn Clock,
    registry: &'a TaskKindRegistry,
    work_root: &'a Path,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        task: &'a mut TaskRecord,
        store: &'a dyn TaskStore,
        files: &'a dyn FileCache,
        clock: &'a dyn Clock,
        registry: &'a TaskKindRegistry,
        work_root: &'a Path,
    ) -> Self {
        let paths = TaskPaths::new(work_root, task);
        Self {
            task,
            paths,
            store,
            files,
            clock,
            registry,
            work_root,
        }
    }

    /// Context for running another task's hooks on an in-memory copy.
    /// Nothing is saved on its behalf.
    pub fn context_for<'b>(&self, other: &'b mut TaskRecord) -> StageContext<'b>
    where
        'a: 'b,
    {
        StageContext::new(other, self.store, self.files, self.clock, self.registry, self.work_root)
    }

    /// Registered kind of another task.
    pub fn kind_of(&self, other: &TaskRecord) -> Option<Arc<dyn TaskKind>> {
        self.registry.get(&other.task_type)
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.store
    }

    pub fn files(&self) -> &dyn FileCache {
        self.files
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn work_root(&self) -> &Path {
        self.work_root
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let now = self.clock.now();
        self.task.add_log(message, now);
    }

    pub fn params<P: DeserializeOwned>(&self) -> Result<P, HookError> {
        Ok(self.task.params_as()?)
    }

    /// Paths of another task (current run).
    pub fn paths_for(&self, other: &TaskRecord) -> TaskPaths {
        TaskPaths::new(self.work_root, other)
    }

    pub fn work_file(&self, name: &str) -> PathBuf {
        self.paths.work_dir.join(name)
    }

    /// Load, modify and save another task, retrying on version conflicts.
    /// `change` returns `false` to leave the record untouched.
    pub async fn update_task<F>(&self, id: TaskId, mut change: F) -> Result<TaskRecord, HookError>
    where
        F: FnMut(&mut TaskRecord, DateTime<Utc>) -> Result<bool, HookError> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut other = self.store.load(id).await?;
            if !change(&mut other, self.clock.now())? {
                return Ok(other);
            }
            match self.store.save(&other).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::Conflict { .. }) if attempt < UPDATE_RETRIES => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Move another task to `next` if it is currently in `from`.
    pub async fn move_task(&self, id: TaskId, from: TaskStatus, next: TaskStatus, note: &str) -> Result<bool, HookError> {
        let mut moved = false;
        self.update_task(id, |other, now| {
            if other.status != from {
                return Ok(false);
            }
            other
                .transition(next, now)
                .map_err(|e| HookError::msg(e.to_string()))?;
            other.add_log(note, now);
            moved = true;
            Ok(true)
        })
        .await?;
        Ok(moved)
    }
}

#[async_trait]
pub trait TaskKind: Send + Sync {
    /// Registry key, stored in `TaskRecord::task_type`.
    fn type_name(&self) -> &'static str;

    /// Local preparation. `Ok(false)` and `Err` both fail the stage.
    async fn setup(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError>;

    /// Shell lines to run on the cluster. The engine wraps them in a script.
    async fn cluster_commands(&self, ctx: &mut StageContext<'_>) -> Result<Vec<String>, HookError>;

    /// Local post-processing of the cluster outputs.
    async fn save_results(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError>;

    async fn recover_from_setup_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(false)
    }

    async fn recover_from_cluster_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(false)
    }

    async fn recover_from_post_processing_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(false)
    }

    async fn restart_at_setup(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(false)
    }

    async fn restart_at_cluster(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(false)
    }

    async fn restart_at_post_processing(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(false)
    }

    /// Runs after a control action went through for this task.
    async fn after_control(&self, _ctx: &mut StageContext<'_>, _action: ControlAction) -> Result<(), HookError> {
        Ok(())
    }

    /// Whether failing this task fails its dependents right away.
    fn cascades_prerequisite_failures(&self) -> bool {
        true
    }
}
