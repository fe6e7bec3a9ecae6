//! Operator - 運用者向けの制御・ステータス要求
//!
//! task id または batch id を指定して使います。

use std::sync::Arc;

use crate::app::status::{StatusCounts, TaskView};
use crate::domain::{BatchId, CapacitySnapshot, Stage, TaskId, TaskRecord};
use crate::driver::ControlAction;
use crate::error::EngineError;
use crate::lifecycle::Engine;

#[derive(Clone)]
pub struct Operator {
    engine: Arc<Engine>,
}

impl Operator {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn control(&self, id: TaskId, action: ControlAction) -> Result<TaskView, EngineError> {
        let task = self.engine.control(id, action).await?;
        Ok(TaskView::from(&task))
    }

    pub async fn suspend(&self, id: TaskId) -> Result<TaskView, EngineError> {
        self.control(id, ControlAction::Suspend).await
    }

    pub async fn resume(&self, id: TaskId) -> Result<TaskView, EngineError> {
        self.control(id, ControlAction::Resume).await
    }

    pub async fn hold(&self, id: TaskId) -> Result<TaskView, EngineError> {
        self.control(id, ControlAction::Hold).await
    }

    pub async fn release(&self, id: TaskId) -> Result<TaskView, EngineError> {
        self.control(id, ControlAction::Release).await
    }

    pub async fn terminate(&self, id: TaskId) -> Result<TaskView, EngineError> {
        self.control(id, ControlAction::Terminate).await
    }

    pub async fn recover(&self, id: TaskId) -> Result<TaskView, EngineError> {
        let task = self.engine.recover(id).await?;
        Ok(TaskView::from(&task))
    }

    pub async fn restart(&self, id: TaskId, stage: Stage) -> Result<TaskView, EngineError> {
        let task = self.engine.restart(id, stage).await?;
        Ok(TaskView::from(&task))
    }

    pub async fn status(&self, id: TaskId) -> Result<TaskView, EngineError> {
        let task = self.engine.store().load(id).await?;
        Ok(TaskView::from(&task))
    }

    /// Full record, history and log included.
    pub async fn task(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        Ok(self.engine.store().load(id).await?)
    }

    pub async fn batch_status(&self, batch: BatchId) -> Result<Vec<TaskView>, EngineError> {
        let tasks = self.engine.store().find_by_batch(batch).await?;
        Ok(tasks.iter().map(TaskView::from).collect())
    }

    pub async fn status_counts(&self, batch: BatchId) -> Result<StatusCounts, EngineError> {
        let tasks = self.engine.store().find_by_batch(batch).await?;
        Ok(StatusCounts::from_tasks(&tasks))
    }

    pub async fn capacity(&self) -> CapacitySnapshot {
        self.engine.driver().capacity_snapshot().await
    }
}
