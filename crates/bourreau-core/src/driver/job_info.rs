//! Per-sweep snapshot of job states.
//!
//! One bulk backend query serves every lookup of a sweep. Control actions
//! invalidate the affected handle; its next lookup asks the driver directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::SchedulerDriver;
use crate::domain::{JobHandle, JobState};

#[derive(Default)]
struct Snapshot {
    states: HashMap<JobHandle, JobState>,
    loaded: bool,
    reliable: bool,
    stale: HashSet<JobHandle>,
}

pub struct JobInfoCache {
    driver: Arc<dyn SchedulerDriver>,
    snapshot: Mutex<Snapshot>,
}

impl JobInfoCache {
    pub fn new(driver: Arc<dyn SchedulerDriver>) -> Self {
        Self {
            driver,
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    pub fn driver(&self) -> &Arc<dyn SchedulerDriver> {
        &self.driver
    }

    /// Replace the whole map with one bulk query.
    pub async fn refresh(&self) {
        let mut snapshot = self.snapshot.lock().await;
        self.refresh_locked(&mut snapshot).await;
    }

    async fn refresh_locked(&self, snapshot: &mut Snapshot) {
        match self.driver.job_states().await {
            Ok(states) => {
                tracing::debug!(driver = self.driver.name(), jobs = states.len(), "job snapshot refreshed");
                snapshot.states = states;
                snapshot.reliable = true;
            }
            Err(e) => {
                tracing::warn!(driver = self.driver.name(), error = %e, "bulk job query failed");
                snapshot.states.clear();
                snapshot.reliable = false;
            }
        }
        snapshot.loaded = true;
        snapshot.stale.clear();
    }

    /// State of `handle`, refreshing first if nothing was loaded yet.
    pub async fn lookup(&self, handle: &JobHandle) -> JobState {
        let mut snapshot = self.snapshot.lock().await;
        if !snapshot.loaded {
            self.refresh_locked(&mut snapshot).await;
        }
        if snapshot.stale.remove(handle) {
            let state = self.driver.query_status(handle).await;
            match state {
                JobState::Undetermined => snapshot.states.remove(handle),
                _ => snapshot.states.insert(handle.clone(), state),
            };
            return state;
        }
        snapshot.states.get(handle).copied().unwrap_or(JobState::Undetermined)
    }

    /// Mark `handle` stale after a control action.
    pub async fn invalidate(&self, handle: &JobHandle) {
        self.snapshot.lock().await.stale.insert(handle.clone());
    }

    /// Whether the last bulk query succeeded. `Undetermined` from an
    /// unreliable snapshot means "unknown", not "gone".
    pub async fn is_reliable(&self) -> bool {
        let snapshot = self.snapshot.lock().await;
        !snapshot.loaded || snapshot.reliable
    }

    /// Load now if not loaded yet, then report reliability.
    pub async fn ensure_loaded(&self) -> bool {
        let mut snapshot = self.snapshot.lock().await;
        if !snapshot.loaded {
            self.refresh_locked(&mut snapshot).await;
        }
        snapshot.reliable
    }
}
