//! Status - ステータスクエリ
//!
//! 読み取り専用のビュー。状態は変更しません。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskRecord, TaskStatus};

/// TaskView は運用者に見せる 1 タスク分の情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    pub run_number: u32,
    pub cluster_jobid: Option<String>,
    pub last_log: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TaskRecord> for TaskView {
    fn from(task: &TaskRecord) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type.clone(),
            status: task.status,
            run_number: task.run_number,
            cluster_jobid: task.cluster_jobid.clone(),
            last_log: task.log.last().map(|entry| entry.message.clone()),
            updated_at: task.updated_at,
        }
    }
}

/// StatusCounts はタスク集合のステータス別集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub terminated: usize,
    /// Everything not yet terminal.
    pub active: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl StatusCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.add(task.status);
        }
        counts
    }

    pub fn add(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Terminated => self.terminated += 1,
            s if s.is_failure() => self.failed += 1,
            _ => self.active += 1,
        }
        *self.by_status.entry(status.as_str().to_string()).or_default() += 1;
    }

    pub fn all_terminal(&self) -> bool {
        self.active == 0
    }
}
