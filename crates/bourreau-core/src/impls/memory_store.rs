//! InMemoryTaskStore: `TaskStore` backed by a `HashMap`.
//!
//! Used by tests and the CLI. Versioning behaves like a durable store:
//! every successful save bumps `version`, a stale save is a `Conflict`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{BatchId, TaskId, TaskRecord};
use crate::error::StoreError;
use crate::ports::TaskStore;

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, mut task: TaskRecord) -> Result<TaskRecord, StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id));
        }
        task.version = 1;
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn load(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, task: &TaskRecord) -> Result<TaskRecord, StoreError> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks.get_mut(&task.id).ok_or(StoreError::NotFound(task.id))?;
        if stored.version != task.version {
            return Err(StoreError::Conflict {
                task: task.id,
                expected: task.version,
                found: stored.version,
            });
        }
        let mut next = task.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn find_tasks_needing_attention(&self, bourreau_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let mut found: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.bourreau_id == bourreau_id && t.status.needs_attention())
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.level, t.id));
        Ok(found)
    }

    async fn find_dependents(&self, target: TaskId) -> Result<Vec<TaskRecord>, StoreError> {
        let mut found: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.prerequisites.gates_on(target).is_empty())
            .cloned()
            .collect();
        found.sort_by_key(|t| t.id);
        Ok(found)
    }

    async fn find_by_batch(&self, batch_id: BatchId) -> Result<Vec<TaskRecord>, StoreError> {
        let mut found: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.batch_id == Some(batch_id))
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.rank, t.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Gate, TaskStatus};
    use chrono::Utc;

    fn record(node: &str) -> TaskRecord {
        TaskRecord::new(TaskId::generate(), "shell", node, Default::default(), Utc::now())
    }

    #[tokio::test]
    async fn stale_save_is_a_conflict() {
        let store = InMemoryTaskStore::new();
        let created = store.create(record("n1")).await.unwrap();

        let mut first = created.clone();
        first.add_log("first writer", Utc::now());
        let saved = store.save(&first).await.unwrap();
        assert_eq!(saved.version, created.version + 1);

        let mut second = created;
        second.add_log("second writer", Utc::now());
        let err = store.save(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryTaskStore::new();
        let task = record("n1");
        store.create(task.clone()).await.unwrap();
        assert!(matches!(store.create(task).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn attention_is_scoped_to_node_and_status() {
        let store = InMemoryTaskStore::new();
        let mine = store.create(record("n1")).await.unwrap();
        store.create(record("n2")).await.unwrap();

        let mut done = record("n1");
        done.status = TaskStatus::Completed;
        store.create(done).await.unwrap();

        let due = store.find_tasks_needing_attention("n1").await.unwrap();
        assert_eq!(due.iter().map(|t| t.id).collect::<Vec<_>>(), vec![mine.id]);
    }

    #[tokio::test]
    async fn dependents_and_batches() {
        let store = InMemoryTaskStore::new();
        let target = store.create(record("n1")).await.unwrap();
        let batch = BatchId::generate();

        let mut waiting = record("n1").with_batch(batch, 1);
        waiting
            .add_prerequisite(Gate::ForSetup, target.id, TaskStatus::Completed)
            .unwrap();
        let waiting = store.create(waiting).await.unwrap();
        let first = store.create(record("n1").with_batch(batch, 0)).await.unwrap();

        let deps = store.find_dependents(target.id).await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, waiting.id);

        let members = store.find_by_batch(batch).await.unwrap();
        assert_eq!(members.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id, waiting.id]);
    }
}
