//! TaskStore port - タスクの永続化
//!
//! タスクと prerequisite edge の source of truth（正本）。
//!
//! # 設計原則
//! - engine は遷移を保存してから、それに依存する副作用を実行する
//! - `save` は楽観ロック: 保存済み version と異なれば `StoreError::Conflict`、
//!   呼び出し側が再読み込みしてリトライする

use async_trait::async_trait;

use crate::domain::{BatchId, TaskId, TaskRecord};
use crate::error::StoreError;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record. Fails on duplicate ids.
    async fn create(&self, task: TaskRecord) -> Result<TaskRecord, StoreError>;

    async fn load(&self, id: TaskId) -> Result<TaskRecord, StoreError>;

    /// Compare-and-swap on `task.version`. Returns the stored record with its
    /// new version.
    async fn save(&self, task: &TaskRecord) -> Result<TaskRecord, StoreError>;

    /// `bourreau_id` が所有し、poll loop の対応が必要なタスク
    async fn find_tasks_needing_attention(&self, bourreau_id: &str) -> Result<Vec<TaskRecord>, StoreError>;

    /// `target` への prerequisite edge を 1 つ以上持つタスク
    async fn find_dependents(&self, target: TaskId) -> Result<Vec<TaskRecord>, StoreError>;

    async fn find_by_batch(&self, batch_id: BatchId) -> Result<Vec<TaskRecord>, StoreError>;
}
