//! Engine: advances one task at a time through its lifecycle.
//!
//! Every transition is persisted before the side effects that depend on it
//! (`Setting Up` before `setup`, `Post Processing` before `save_results`).
//! Hook failures never escape: they become a `Failed *` status plus a log
//! entry on the task.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::kind::{StageContext, TaskKind};
use super::locks::TaskLocks;
use super::paths::{TaskPaths, render_script};
use super::registry::TaskKindRegistry;
use crate::domain::{
    BatchId, Gate, JobHandle, JobSpec, JobState, PrerequisiteCheck, Stage, TaskId, TaskRecord, TaskStatus,
};
use crate::driver::{JobInfoCache, SchedulerDriver};
use crate::error::{EngineError, HookError, StoreError};
use crate::ports::{Clock, FileCache, IdGenerator, TaskStore};
use crate::prerequisites::PrerequisiteGraph;
use crate::signal::WorkSignal;

/// Reloads after a version conflict before a step gives up.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Param keys read when building the job spec.
const QUEUE_PARAM: &str = "cluster_queue";
const WALLTIME_PARAM: &str = "cluster_walltime_secs";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Execution node this engine advances tasks for.
    pub bourreau_id: String,
    pub work_root: PathBuf,
    /// A job missing from the backend this soon after submission is not
    /// considered finished yet.
    pub submission_grace: Duration,
    pub cascade_prerequisite_failures: bool,
    pub default_queue: Option<String>,
    pub default_walltime: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bourreau_id: "local".to_string(),
            work_root: std::env::temp_dir().join("bourreau"),
            submission_grace: Duration::from_secs(30),
            cascade_prerequisite_failures: true,
            default_queue: None,
            default_walltime: None,
        }
    }
}

/// What one `advance` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Someone else is advancing the task right now.
    Busy,
    Idle(TaskStatus),
    Moved { from: TaskStatus, to: TaskStatus },
}

pub struct Engine {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) driver: Arc<dyn SchedulerDriver>,
    pub(crate) files: Arc<dyn FileCache>,
    pub(crate) registry: TaskKindRegistry,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) locks: TaskLocks,
    pub(crate) signal: WorkSignal,
    pub(crate) settings: EngineSettings,
    sweep_cache: Mutex<Option<Arc<JobInfoCache>>>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        driver: Arc<dyn SchedulerDriver>,
        files: Arc<dyn FileCache>,
        registry: TaskKindRegistry,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        signal: WorkSignal,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            driver,
            files,
            registry,
            clock,
            ids,
            locks: TaskLocks::new(),
            signal,
            settings,
            sweep_cache: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn driver(&self) -> &Arc<dyn SchedulerDriver> {
        &self.driver
    }

    pub fn registry(&self) -> &TaskKindRegistry {
        &self.registry
    }

    pub fn signal(&self) -> &WorkSignal {
        &self.signal
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Unsaved record owned by this node.
    pub fn new_task(&self, task_type: &str, params: serde_json::Map<String, serde_json::Value>) -> TaskRecord {
        TaskRecord::new(
            self.ids.generate_task_id(),
            task_type,
            self.settings.bourreau_id.as_str(),
            params,
            self.clock.now(),
        )
    }

    pub fn new_batch_id(&self) -> BatchId {
        self.ids.generate_batch_id()
    }

    /// Store a new task and wake the poll loops.
    pub async fn create_task(&self, task: TaskRecord) -> Result<TaskRecord, EngineError> {
        if self.registry.get(&task.task_type).is_none() {
            return Err(EngineError::UnknownTaskType(task.task_type));
        }
        let created = self.store.create(task).await?;
        debug!(task_id = %created.id, task_type = %created.task_type, "task created");
        self.signal.bump();
        Ok(created)
    }

    /// Job snapshot for one sweep. Control actions issued while the sweep runs
    /// invalidate the handles they touch.
    pub fn begin_sweep(&self) -> Arc<JobInfoCache> {
        let cache = Arc::new(JobInfoCache::new(Arc::clone(&self.driver)));
        *self.sweep_cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&cache));
        cache
    }

    pub fn end_sweep(&self) {
        self.sweep_cache.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub(crate) async fn invalidate_job(&self, handle: &JobHandle) {
        let cache = self.sweep_cache.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(cache) = cache {
            cache.invalidate(handle).await;
        }
    }

    pub(crate) fn kind(&self, task: &TaskRecord) -> Result<Arc<dyn TaskKind>, EngineError> {
        self.registry
            .get(&task.task_type)
            .ok_or_else(|| EngineError::UnknownTaskType(task.task_type.clone()))
    }

    pub(crate) fn context<'a>(&'a self, task: &'a mut TaskRecord) -> StageContext<'a> {
        StageContext::new(
            task,
            self.store.as_ref(),
            self.files.as_ref(),
            self.clock.as_ref(),
            &self.registry,
            &self.settings.work_root,
        )
    }

    /// Advance `id` by whatever its status calls for. Skips tasks another
    /// advancement holds.
    pub async fn advance(&self, id: TaskId, cache: &JobInfoCache) -> Result<Advance, EngineError> {
        let Some(_guard) = self.locks.try_acquire(id) else {
            return Ok(Advance::Busy);
        };

        let mut attempt = 0;
        loop {
            let task = self.store.load(id).await?;
            let from = task.status;
            match self.step(task, cache).await {
                Ok(task) if task.status == from => return Ok(Advance::Idle(from)),
                Ok(task) => return Ok(Advance::Moved { from, to: task.status }),
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(task_id = %id, attempt, "conflicting save, reloading");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn step(&self, task: TaskRecord, cache: &JobInfoCache) -> Result<TaskRecord, EngineError> {
        match task.status {
            TaskStatus::New => self.step_new(task).await,
            TaskStatus::Configured => self.step_configured(task).await,
            TaskStatus::Queued | TaskStatus::OnHold | TaskStatus::OnCpu | TaskStatus::Suspended => {
                self.step_on_cluster(task, cache).await
            }
            TaskStatus::DataReady => self.step_data_ready(task).await,
            TaskStatus::RecoverSetup => self.step_recover(task, Stage::Setup).await,
            TaskStatus::RecoverCluster => self.step_recover(task, Stage::Cluster).await,
            TaskStatus::RecoverPostProcess => self.step_recover(task, Stage::PostProcessing).await,
            TaskStatus::RestartSetup => self.step_restart(task, Stage::Setup).await,
            TaskStatus::RestartCluster => self.step_restart(task, Stage::Cluster).await,
            TaskStatus::RestartPostProcess => self.step_restart(task, Stage::PostProcessing).await,
            _ => Ok(task),
        }
    }

    async fn step_new(&self, mut task: TaskRecord) -> Result<TaskRecord, EngineError> {
        match self.check_gate(&task, Gate::ForSetup).await? {
            PrerequisiteCheck::Pending => return Ok(task),
            PrerequisiteCheck::Unsatisfiable { reason, .. } => {
                let note = format!("setup prerequisites cannot be met: {reason}");
                return self.move_to(task, TaskStatus::FailedSetupPrerequisites, note).await;
            }
            PrerequisiteCheck::Satisfied => {}
        }

        let kind = self.kind(&task)?;
        task.prerequisites.clear(Gate::ForSetup);
        let mut task = self.move_to(task, TaskStatus::SettingUp, "setting up").await?;

        let outcome = {
            let mut ctx = self.context(&mut task);
            kind.setup(&mut ctx).await
        };
        if let Err(reason) = stage_verdict("setup", outcome) {
            return self.move_to(task, TaskStatus::FailedToSetup, reason).await;
        }
        self.launch(task, kind.as_ref(), TaskStatus::FailedToSetup).await
    }

    /// Write the run's script, then park at `Configured` or submit it.
    /// Script problems move the task to `failure`.
    async fn launch(&self, mut task: TaskRecord, kind: &dyn TaskKind, failure: TaskStatus) -> Result<TaskRecord, EngineError> {
        let paths = match self.write_script(&mut task, kind).await {
            Ok(paths) => paths,
            Err(reason) => return self.move_to(task, failure, reason).await,
        };
        if task.configure_only && task.status == TaskStatus::SettingUp {
            let note = format!("configured, script at {}", paths.script.display());
            return self.move_to(task, TaskStatus::Configured, note).await;
        }
        self.submit(task, &paths).await
    }

    async fn write_script(&self, task: &mut TaskRecord, kind: &dyn TaskKind) -> Result<TaskPaths, String> {
        let commands = {
            let mut ctx = self.context(task);
            kind.cluster_commands(&mut ctx)
                .await
                .map_err(|e| format!("cluster commands failed: {e}"))?
        };
        let paths = TaskPaths::new(&self.settings.work_root, task);
        let script = render_script(task, &paths, &commands);
        tokio::fs::create_dir_all(&paths.work_dir)
            .await
            .map_err(|e| format!("cannot create {}: {e}", paths.work_dir.display()))?;
        tokio::fs::write(&paths.script, script)
            .await
            .map_err(|e| format!("cannot write {}: {e}", paths.script.display()))?;
        Ok(paths)
    }

    fn job_spec(&self, task: &TaskRecord, paths: &TaskPaths) -> JobSpec {
        let command = vec!["/bin/sh".to_string(), paths.script.to_string_lossy().into_owned()];
        let mut spec = JobSpec::new(task.display_name(), command, paths.work_dir.clone())
            .with_output(paths.stdout.clone(), Some(paths.stderr.clone()));

        let queue = task
            .params
            .get(QUEUE_PARAM)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.settings.default_queue.clone());
        if let Some(queue) = queue {
            spec = spec.with_queue(queue);
        }
        let walltime = task
            .params
            .get(WALLTIME_PARAM)
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .or(self.settings.default_walltime);
        if let Some(walltime) = walltime {
            spec = spec.with_walltime(walltime);
        }
        spec
    }

    /// Submit once per run. A task that already carries a handle is not
    /// resubmitted.
    async fn submit(&self, mut task: TaskRecord, paths: &TaskPaths) -> Result<TaskRecord, EngineError> {
        if let Some(handle) = task.cluster_jobid.clone() {
            return self
                .move_to(task, TaskStatus::Queued, format!("job {handle} already submitted"))
                .await;
        }

        let spec = self.job_spec(&task, paths);
        let handle = match self.driver.submit(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(task_id = %task.id, driver = self.driver.name(), error = %e, "submission failed");
                let note = format!("submission failed: {e}");
                return self.move_to(task, TaskStatus::FailedOnCluster, note).await;
            }
        };

        let expected = task.status;
        let now = self.clock.now();
        task.attach_job(handle.as_str(), now);
        task.transition(TaskStatus::Queued, now)?;
        task.add_log(format!("submitted as job {handle}"), now);
        match self.store.save(&task).await {
            Ok(saved) => {
                info!(task_id = %saved.id, %handle, status = %saved.status, "job submitted");
                self.signal.bump();
                Ok(saved)
            }
            Err(StoreError::Conflict { .. }) => self.reconcile_submission(task.id, expected, handle).await,
            Err(e) => {
                self.terminate_orphan(task.id, &handle).await;
                Err(e.into())
            }
        }
    }

    /// The save after a submission lost a race: re-apply the handle if the
    /// task is still where it was, else kill the job nobody will track.
    async fn reconcile_submission(
        &self,
        id: TaskId,
        expected: TaskStatus,
        handle: JobHandle,
    ) -> Result<TaskRecord, EngineError> {
        let mut attempt = 0;
        loop {
            let mut current = self.store.load(id).await?;
            if current.status != expected || current.cluster_jobid.is_some() {
                self.terminate_orphan(id, &handle).await;
                return Ok(current);
            }
            let now = self.clock.now();
            current.attach_job(handle.as_str(), now);
            current.transition(TaskStatus::Queued, now)?;
            current.add_log(format!("submitted as job {handle}"), now);
            match self.store.save(&current).await {
                Ok(saved) => {
                    info!(task_id = %id, %handle, "job handle re-applied after conflict");
                    self.signal.bump();
                    return Ok(saved);
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_CONFLICT_RETRIES => attempt += 1,
                Err(e) => {
                    self.terminate_orphan(id, &handle).await;
                    return Err(e.into());
                }
            }
        }
    }

    async fn terminate_orphan(&self, id: TaskId, handle: &JobHandle) {
        warn!(task_id = %id, %handle, "terminating job no task tracks");
        if let Err(e) = self.driver.terminate(handle).await {
            warn!(task_id = %id, %handle, error = %e, "orphan job could not be terminated");
        }
    }

    async fn step_on_cluster(&self, task: TaskRecord, cache: &JobInfoCache) -> Result<TaskRecord, EngineError> {
        let Some(raw) = task.cluster_jobid.clone() else {
            return Ok(task);
        };
        if !cache.ensure_loaded().await {
            debug!(task_id = %task.id, "job snapshot unreliable, leaving task as is");
            return Ok(task);
        }

        let handle = JobHandle::new(raw);
        let next = match cache.lookup(&handle).await {
            JobState::Running => TaskStatus::OnCpu,
            JobState::QueuedActive => TaskStatus::Queued,
            JobState::UserOnHold => TaskStatus::OnHold,
            JobState::UserSuspended => TaskStatus::Suspended,
            JobState::Undetermined if self.within_grace(&task) => return Ok(task),
            JobState::Undetermined => TaskStatus::DataReady,
        };
        if next == task.status {
            return Ok(task);
        }
        let note = match next {
            TaskStatus::DataReady => format!("job {handle} left the cluster"),
            _ => format!("job {handle} is {next}"),
        };
        self.move_to(task, next, note).await
    }

    fn within_grace(&self, task: &TaskRecord) -> bool {
        let grace = chrono::Duration::from_std(self.settings.submission_grace).unwrap_or(chrono::Duration::zero());
        task.submitted_at
            .is_some_and(|at| self.clock.now() - at < grace)
    }

    async fn step_configured(&self, task: TaskRecord) -> Result<TaskRecord, EngineError> {
        match self.check_gate(&task, Gate::ForPostProcessing).await? {
            PrerequisiteCheck::Unsatisfiable { reason, .. } => {
                let note = format!("post processing prerequisites cannot be met: {reason}");
                self.move_to(task, TaskStatus::FailedPostProcessPrerequisites, note).await
            }
            _ => Ok(task),
        }
    }

    async fn step_data_ready(&self, mut task: TaskRecord) -> Result<TaskRecord, EngineError> {
        match self.check_gate(&task, Gate::ForPostProcessing).await? {
            PrerequisiteCheck::Pending => return Ok(task),
            PrerequisiteCheck::Unsatisfiable { reason, .. } => {
                let note = format!("post processing prerequisites cannot be met: {reason}");
                return self.move_to(task, TaskStatus::FailedPostProcessPrerequisites, note).await;
            }
            PrerequisiteCheck::Satisfied => {}
        }

        let kind = self.kind(&task)?;
        task.prerequisites.clear(Gate::ForPostProcessing);
        let mut task = self.move_to(task, TaskStatus::PostProcessing, "post processing").await?;

        let outcome = {
            let mut ctx = self.context(&mut task);
            kind.save_results(&mut ctx).await
        };
        match stage_verdict("save_results", outcome) {
            Ok(()) => self.move_to(task, TaskStatus::Completed, "completed").await,
            Err(reason) => self.move_to(task, TaskStatus::FailedToPostProcess, reason).await,
        }
    }

    async fn step_recover(&self, mut task: TaskRecord, stage: Stage) -> Result<TaskRecord, EngineError> {
        let kind = self.kind(&task)?;
        let outcome = {
            let mut ctx = self.context(&mut task);
            match stage {
                Stage::Setup => kind.recover_from_setup_failure(&mut ctx).await,
                Stage::Cluster => kind.recover_from_cluster_failure(&mut ctx).await,
                Stage::PostProcessing => kind.recover_from_post_processing_failure(&mut ctx).await,
            }
        };
        if let Err(reason) = stage_verdict(&format!("{stage} recovery"), outcome) {
            return self.decline(task, reason).await;
        }

        task.prior_status = None;
        match stage {
            Stage::Setup => self.move_to(task, TaskStatus::New, "recovering setup").await,
            Stage::Cluster => self.launch(task, kind.as_ref(), TaskStatus::FailedOnCluster).await,
            Stage::PostProcessing => {
                self.move_to(task, TaskStatus::DataReady, "recovering post processing")
                    .await
            }
        }
    }

    async fn step_restart(&self, mut task: TaskRecord, stage: Stage) -> Result<TaskRecord, EngineError> {
        let kind = self.kind(&task)?;
        let outcome = {
            let mut ctx = self.context(&mut task);
            match stage {
                Stage::Setup => kind.restart_at_setup(&mut ctx).await,
                Stage::Cluster => kind.restart_at_cluster(&mut ctx).await,
                Stage::PostProcessing => kind.restart_at_post_processing(&mut ctx).await,
            }
        };
        if let Err(reason) = stage_verdict(&format!("{stage} restart"), outcome) {
            return self.decline(task, reason).await;
        }

        let previous = TaskPaths::new(&self.settings.work_root, &task);
        task.begin_new_run(self.clock.now());
        info!(task_id = %task.id, run = task.run_number, %stage, "restarting");
        match stage {
            Stage::Setup => self.move_to(task, TaskStatus::New, "restarting at setup").await,
            Stage::Cluster => self.launch(task, kind.as_ref(), TaskStatus::FailedOnCluster).await,
            Stage::PostProcessing => {
                let paths = TaskPaths::new(&self.settings.work_root, &task);
                if let Err(e) = paths.carry_outputs_from(&previous).await {
                    let note = format!("cannot carry outputs of run {}: {e}", task.run_number - 1);
                    return self.move_to(task, TaskStatus::FailedToPostProcess, note).await;
                }
                self.move_to(task, TaskStatus::DataReady, "restarting post processing")
                    .await
            }
        }
    }

    /// Leave a meta-state for the status the task came from.
    async fn decline(&self, mut task: TaskRecord, reason: String) -> Result<TaskRecord, EngineError> {
        let from = task.status;
        let now = self.clock.now();
        task.return_to_prior(now)?;
        task.add_log(reason, now);
        let saved = self.persist(&task).await?;
        info!(task_id = %saved.id, from = %from, status = %saved.status, "request declined");
        Ok(saved)
    }

    /// Combined verdict of one gate. A wait that can never resolve because of
    /// a prerequisite cycle counts as unsatisfiable.
    async fn check_gate(&self, task: &TaskRecord, gate: Gate) -> Result<PrerequisiteCheck, EngineError> {
        let mut checks = Vec::new();
        for (target, required) in task.prerequisites.edges(gate) {
            let status = match self.store.load(target).await {
                Ok(target) => Some(target.status),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            checks.push(PrerequisiteCheck::edge(target, status, required));
        }

        let check = PrerequisiteCheck::combine(checks);
        if check != PrerequisiteCheck::Pending {
            return Ok(check);
        }
        let graph = PrerequisiteGraph::load_from(self.store.as_ref(), task).await?;
        Ok(match graph.deadlock_through(task.id, gate) {
            Some(chain) => {
                let names: Vec<String> = chain.iter().map(ToString::to_string).collect();
                PrerequisiteCheck::Unsatisfiable {
                    target: chain.get(1).copied().unwrap_or(task.id),
                    reason: format!("prerequisite cycle {}", names.join(" -> ")),
                }
            }
            None => PrerequisiteCheck::Pending,
        })
    }

    pub(crate) async fn persist(&self, task: &TaskRecord) -> Result<TaskRecord, EngineError> {
        let saved = self.store.save(task).await?;
        self.signal.bump();
        Ok(saved)
    }

    /// Transition, log, persist; dead ends cascade to dependents.
    pub(crate) async fn move_to(
        &self,
        mut task: TaskRecord,
        next: TaskStatus,
        note: impl Into<String>,
    ) -> Result<TaskRecord, EngineError> {
        let from = task.status;
        let now = self.clock.now();
        task.transition(next, now)?;
        task.add_log(note, now);
        self.commit(task, from).await
    }

    /// Persist a record whose transition was applied in memory.
    pub(crate) async fn commit(&self, task: TaskRecord, from: TaskStatus) -> Result<TaskRecord, EngineError> {
        let saved = self.persist(&task).await?;
        if saved.status.is_failure() {
            let note = saved.log.last().map(|entry| entry.message.as_str()).unwrap_or_default();
            warn!(task_id = %saved.id, from = %from, status = %saved.status, note, "task failed");
        } else {
            info!(task_id = %saved.id, from = %from, status = %saved.status, "task moved");
        }
        if saved.status.is_dead_end() && from != saved.status {
            self.cascade(&saved).await;
        }
        Ok(saved)
    }

    /// Fail every dependent still waiting at a gate that `failed` can no
    /// longer open, and their dependents in turn.
    async fn cascade(&self, failed: &TaskRecord) {
        if !self.settings.cascade_prerequisite_failures {
            return;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([(failed.id, failed.task_type.clone())]);

        while let Some((source, task_type)) = queue.pop_front() {
            if !seen.insert(source) {
                continue;
            }
            if self
                .registry
                .get(&task_type)
                .is_some_and(|kind| !kind.cascades_prerequisite_failures())
            {
                debug!(task_id = %source, task_type = %task_type, "kind opts out of cascading");
                continue;
            }
            let dependents = match self.store.find_dependents(source).await {
                Ok(dependents) => dependents,
                Err(e) => {
                    warn!(task_id = %source, error = %e, "cannot look up dependents");
                    continue;
                }
            };
            for dependent in dependents {
                match self.cascade_into(dependent.id, source).await {
                    Ok(Some(task)) => queue.push_back((task.id, task.task_type)),
                    Ok(None) => {}
                    Err(e) => warn!(task_id = %dependent.id, source = %source, error = %e, "cascade failed"),
                }
            }
        }
    }

    async fn cascade_into(&self, id: TaskId, source: TaskId) -> Result<Option<TaskRecord>, EngineError> {
        let mut attempt = 0;
        loop {
            let mut task = self.store.load(id).await?;
            let gate = task
                .prerequisites
                .gates_on(source)
                .into_iter()
                .find(|gate| gate.is_waiting_in(task.status));
            let Some(gate) = gate else {
                return Ok(None);
            };

            let from = task.status;
            let now = self.clock.now();
            task.transition(gate.failure_status(), now)?;
            task.add_log(format!("prerequisite {source} can no longer be met"), now);
            match self.store.save(&task).await {
                Ok(saved) => {
                    warn!(task_id = %id, source = %source, from = %from, status = %saved.status, "prerequisite failure cascaded");
                    self.signal.bump();
                    return Ok(Some(saved));
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_CONFLICT_RETRIES => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// `Ok(false)` and errors both fail a stage; either way the reason ends up
/// in the task log.
fn stage_verdict(hook: &str, outcome: Result<bool, HookError>) -> Result<(), String> {
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("{hook} declined")),
        Err(e) => Err(format!("{hook} failed: {e}")),
    }
}
