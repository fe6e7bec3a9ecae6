use thiserror::Error;

use crate::domain::{InvalidPrerequisite, TaskId, TransitionError};
use crate::driver::DriverError;

/// Errors reported by a `TaskStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Concurrent modification: reload and retry the transition.
    #[error("version conflict on {task}: expected {expected}, found {found}")]
    Conflict {
        task: TaskId,
        expected: u64,
        found: u64,
    },

    #[error("task already exists: {0}")]
    Duplicate(TaskId),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failure raised by a stage hook. Never escapes a sweep: the engine turns
/// it into a `Failed *` status and a task log entry.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Message(String),

    #[error("invalid params: {0}")]
    Params(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    FileCache(#[from] crate::ports::FileCacheError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl HookError {
    pub fn msg(message: impl Into<String>) -> Self {
        HookError::Message(message.into())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    InvalidPrerequisite(#[from] InvalidPrerequisite),

    #[error("no task kind registered for task_type={0}")]
    UnknownTaskType(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// Another writer got there first; the caller should reload and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::Conflict { .. }))
    }
}
