//! InMemoryDriver: simulated job backend.
//!
//! Jobs only change state when a test (or a dry run) says so. Every call is
//! counted so tests can check how often the backend was asked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::{CapacitySnapshot, JobHandle, JobSpec, JobState, JobStates};
use crate::driver::{ControlAction, DriverError, SchedulerDriver};

/// What happens to a freshly submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitBehavior {
    /// Stay queued until told otherwise.
    #[default]
    Queue,
    /// Disappear from the backend right away, as if it ran instantly.
    FinishImmediately,
}

#[derive(Default)]
struct Backend {
    jobs: HashMap<JobHandle, JobState>,
    submitted: Vec<(JobHandle, JobSpec)>,
    controls: Vec<(ControlAction, JobHandle)>,
}

pub struct InMemoryDriver {
    backend: Arc<Mutex<Backend>>,
    next_id: AtomicU64,
    behavior: Mutex<SubmitBehavior>,
    unreachable: AtomicBool,
    reject_submissions: AtomicBool,
    bulk_queries: AtomicUsize,
    single_queries: AtomicUsize,
    max_jobs: u64,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Mutex::new(Backend::default())),
            next_id: AtomicU64::new(1),
            behavior: Mutex::new(SubmitBehavior::Queue),
            unreachable: AtomicBool::new(false),
            reject_submissions: AtomicBool::new(false),
            bulk_queries: AtomicUsize::new(0),
            single_queries: AtomicUsize::new(0),
            max_jobs: 64,
        }
    }

    pub fn with_behavior(self, behavior: SubmitBehavior) -> Self {
        *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
        self
    }

    fn backend(&self) -> std::sync::MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, handle: &JobHandle, state: JobState) {
        self.backend().jobs.insert(handle.clone(), state);
    }

    /// The job leaves the backend (finished, killed externally, ...).
    pub fn finish(&self, handle: &JobHandle) {
        self.backend().jobs.remove(handle);
    }

    pub fn finish_all(&self) {
        self.backend().jobs.clear();
    }

    pub fn state(&self, handle: &JobHandle) -> Option<JobState> {
        self.backend().jobs.get(handle).copied()
    }

    /// Bulk and single queries fail while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<(JobHandle, JobSpec)> {
        self.backend().submitted.clone()
    }

    pub fn controls(&self) -> Vec<(ControlAction, JobHandle)> {
        self.backend().controls.clone()
    }

    pub fn bulk_queries(&self) -> usize {
        self.bulk_queries.load(Ordering::SeqCst)
    }

    pub fn single_queries(&self) -> usize {
        self.single_queries.load(Ordering::SeqCst)
    }

    fn apply(&self, action: ControlAction, handle: &JobHandle, next: JobState) -> Result<(), DriverError> {
        let mut backend = self.backend();
        backend.controls.push((action, handle.clone()));
        match backend.jobs.get_mut(handle) {
            Some(state) => {
                *state = next;
                Ok(())
            }
            None => Err(DriverError::control(handle, "unknown job")),
        }
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulerDriver for InMemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, DriverError> {
        spec.validate().map_err(DriverError::Submission)?;
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(DriverError::Submission("backend refused the job".to_string()));
        }
        let handle = JobHandle::new(format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        let behavior = *self.behavior.lock().unwrap_or_else(|e| e.into_inner());

        let mut backend = self.backend();
        backend.submitted.push((handle.clone(), spec.clone()));
        if behavior == SubmitBehavior::Queue {
            backend.jobs.insert(handle.clone(), JobState::QueuedActive);
        }
        Ok(handle)
    }

    async fn job_states(&self) -> Result<JobStates, DriverError> {
        self.bulk_queries.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DriverError::Backend("memory backend unreachable".to_string()));
        }
        Ok(self.backend().jobs.clone())
    }

    async fn query_status(&self, handle: &JobHandle) -> JobState {
        self.single_queries.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return JobState::Undetermined;
        }
        self.state(handle).unwrap_or(JobState::Undetermined)
    }

    async fn hold(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.apply(ControlAction::Hold, handle, JobState::UserOnHold)
    }

    async fn release(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.apply(ControlAction::Release, handle, JobState::QueuedActive)
    }

    async fn suspend(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.apply(ControlAction::Suspend, handle, JobState::UserSuspended)
    }

    async fn resume(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.apply(ControlAction::Resume, handle, JobState::Running)
    }

    async fn terminate(&self, handle: &JobHandle) -> Result<(), DriverError> {
        let mut backend = self.backend();
        backend.controls.push((ControlAction::Terminate, handle.clone()));
        backend.jobs.remove(handle);
        Ok(())
    }

    async fn capacity_snapshot(&self) -> CapacitySnapshot {
        if self.unreachable.load(Ordering::SeqCst) {
            return CapacitySnapshot::exception();
        }
        CapacitySnapshot::counts(self.backend().jobs.len() as u64, self.max_jobs)
    }
}
