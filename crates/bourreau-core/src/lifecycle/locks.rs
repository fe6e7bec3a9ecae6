//! Per-task advancement locks.
//!
//! A sweep skips tasks that are already being advanced (`try_acquire`);
//! operator requests wait their turn (`acquire`). Releasing happens when the
//! guard drops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::domain::TaskId;

#[derive(Default)]
struct Inner {
    held: Mutex<HashSet<TaskId>>,
    released: Notify,
}

#[derive(Clone, Default)]
pub struct TaskLocks {
    inner: Arc<Inner>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, id: TaskId) -> Option<TaskLockGuard> {
        let mut held = self.inner.held.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(id).then(|| TaskLockGuard {
            inner: Arc::clone(&self.inner),
            id,
        })
    }

    pub async fn acquire(&self, id: TaskId) -> TaskLockGuard {
        loop {
            // Register interest before checking so a release in between is seen.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(guard) = self.try_acquire(id) {
                return guard;
            }
            released.await;
        }
    }

    pub fn is_held(&self, id: TaskId) -> bool {
        self.inner
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }
}

pub struct TaskLockGuard {
    inner: Arc<Inner>,
    id: TaskId,
}

impl TaskLockGuard {
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        self.inner
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
        self.inner.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_try_acquire_is_refused_until_release() {
        let locks = TaskLocks::new();
        let id = TaskId::generate();

        let guard = locks.try_acquire(id).unwrap();
        assert!(locks.try_acquire(id).is_none());
        assert!(locks.try_acquire(TaskId::generate()).is_some());

        drop(guard);
        assert!(!locks.is_held(id));
        assert!(locks.try_acquire(id).is_some());
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let locks = TaskLocks::new();
        let id = TaskId::generate();
        let guard = locks.try_acquire(id).unwrap();

        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move { locks.acquire(id).await.task_id() }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got, id);
    }
}
