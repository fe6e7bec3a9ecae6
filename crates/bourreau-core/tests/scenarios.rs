//! End-to-end runs through the public API: builder, poll sweeps, operator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bourreau_core::app::{EngineBuilder, Operator, sweep};
use bourreau_core::domain::{Gate, JobHandle, JobState, TaskId, TaskRecord, TaskStatus};
use bourreau_core::driver::{LocalDriver, SchedulerDriver};
use bourreau_core::error::HookError;
use bourreau_core::impls::{InMemoryDriver, InMemoryTaskStore, SHELL_TASK_TYPE, ShellParams};
use bourreau_core::lifecycle::{Engine, EngineSettings, StageContext, TaskKind};
use bourreau_core::parallelizer::{PARALLELIZER_TYPE, launch_group};
use bourreau_core::ports::TaskStore;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::sync::Semaphore;

const STEP: &str = "step";

#[derive(Debug, Default, Deserialize)]
struct StepParams {
    #[serde(default)]
    fail_setup: bool,
}

/// Succeeds at every stage unless `fail_setup` is set.
struct StepKind;

#[async_trait]
impl TaskKind for StepKind {
    fn type_name(&self) -> &'static str {
        STEP
    }

    async fn setup(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        let params: StepParams = ctx.params()?;
        Ok(!params.fail_setup)
    }

    async fn cluster_commands(&self, _ctx: &mut StageContext<'_>) -> Result<Vec<String>, HookError> {
        Ok(vec!["true".to_string()])
    }

    async fn save_results(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(true)
    }
}

fn settings(dir: &TempDir) -> EngineSettings {
    EngineSettings {
        bourreau_id: "scenario".to_string(),
        work_root: dir.path().to_path_buf(),
        submission_grace: Duration::ZERO,
        ..EngineSettings::default()
    }
}

fn engine_with(dir: &TempDir, store: Arc<InMemoryTaskStore>, driver: Arc<dyn SchedulerDriver>) -> Arc<Engine> {
    EngineBuilder::new()
        .register(StepKind)
        .unwrap()
        .with_builtin_kinds()
        .unwrap()
        .expect_task_types(&[STEP, PARALLELIZER_TYPE, SHELL_TASK_TYPE])
        .store(store)
        .driver(driver)
        .settings(settings(dir))
        .build()
        .unwrap()
}

fn step_task(engine: &Engine, fail_setup: bool) -> TaskRecord {
    let mut params = serde_json::Map::new();
    params.insert("fail_setup".to_string(), serde_json::Value::Bool(fail_setup));
    engine.new_task(STEP, params)
}

async fn status(store: &InMemoryTaskStore, id: TaskId) -> TaskStatus {
    store.load(id).await.unwrap().status
}

/// Sweep with every in-memory job finishing at once, until nothing is left
/// needing attention.
async fn run_to_rest(engine: &Arc<Engine>, driver: &InMemoryDriver) {
    let permits = Arc::new(Semaphore::new(4));
    for _ in 0..30 {
        driver.finish_all();
        sweep(engine, &permits).await.unwrap();
    }
}

#[tokio::test]
async fn grouped_launch_runs_every_task_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryTaskStore::new());
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(&dir, store.clone(), driver.clone());

    let batch = engine.new_batch_id();
    let tasks: Vec<TaskRecord> = (0..5)
        .map(|rank| step_task(&engine, false).with_batch(batch, rank))
        .collect();
    let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();

    let report = launch_group(&engine, tasks, 2).await.unwrap();
    assert_eq!(report.wrappers.len(), 2);
    assert_eq!(report.independent, vec![ids[4]]);
    assert_eq!(report.covered, 4);

    run_to_rest(&engine, &driver).await;

    for id in ids.iter().chain(&report.wrappers) {
        assert_eq!(status(&store, *id).await, TaskStatus::Completed, "task {id}");
    }
    // Two wrapper jobs plus the independent task; members never submit.
    assert_eq!(driver.submissions().len(), 3);

    let counts = Operator::new(engine.clone()).status_counts(batch).await.unwrap();
    assert_eq!(counts.total, 7);
    assert_eq!(counts.completed, 7);
}

#[tokio::test]
async fn failed_setup_cascades_without_running_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryTaskStore::new());
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(&dir, store.clone(), driver.clone());

    let upstream = engine.create_task(step_task(&engine, true)).await.unwrap();
    let mut dependent = step_task(&engine, false);
    dependent
        .add_prerequisite(Gate::ForSetup, upstream.id, TaskStatus::Completed)
        .unwrap();
    let dependent = engine.create_task(dependent).await.unwrap();

    run_to_rest(&engine, &driver).await;

    assert_eq!(status(&store, upstream.id).await, TaskStatus::FailedToSetup);
    let dependent = store.load(dependent.id).await.unwrap();
    assert_eq!(dependent.status, TaskStatus::FailedSetupPrerequisites);
    assert!(
        dependent.history.iter().all(|t| t.to != TaskStatus::SettingUp),
        "dependent never set up"
    );
    assert!(driver.submissions().is_empty());
}

#[cfg(target_os = "linux")]
/// Poll the driver every 50ms for up to ten seconds.
async fn wait_for_state(driver: &LocalDriver, handle: &JobHandle, want: JobState) -> bool {
    for _ in 0..200 {
        if driver.query_status(handle).await == want {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn local_job_is_running_then_gone() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryTaskStore::new());
    let driver = Arc::new(LocalDriver::new());
    let engine = engine_with(&dir, store.clone(), driver.clone());
    let permits = Arc::new(Semaphore::new(1));

    let params = ShellParams::new(["sleep 1"]).to_params();
    let task = engine.create_task(engine.new_task(SHELL_TASK_TYPE, params)).await.unwrap();
    sweep(&engine, &permits).await.unwrap();

    let submitted = store.load(task.id).await.unwrap();
    let handle = JobHandle::new(submitted.cluster_jobid.clone().unwrap());
    assert_eq!(driver.query_status(&handle).await, JobState::Running);

    sweep(&engine, &permits).await.unwrap();
    assert_eq!(status(&store, task.id).await, TaskStatus::OnCpu);

    for _ in 0..200 {
        sweep(&engine, &permits).await.unwrap();
        if status(&store, task.id).await.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(driver.query_status(&handle).await, JobState::Undetermined);
    assert_eq!(status(&store, task.id).await, TaskStatus::Completed);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn local_job_suspends_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryTaskStore::new());
    let driver = Arc::new(LocalDriver::new());
    let engine = engine_with(&dir, store.clone(), driver.clone());
    let operator = Operator::new(engine.clone());
    let permits = Arc::new(Semaphore::new(1));

    let params = ShellParams::new(["sleep 30"]).to_params();
    let task = engine.create_task(engine.new_task(SHELL_TASK_TYPE, params)).await.unwrap();
    sweep(&engine, &permits).await.unwrap();
    sweep(&engine, &permits).await.unwrap();
    assert_eq!(status(&store, task.id).await, TaskStatus::OnCpu);
    let handle = JobHandle::new(store.load(task.id).await.unwrap().cluster_jobid.unwrap());

    let view = operator.suspend(task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Suspended);
    assert!(wait_for_state(&driver, &handle, JobState::UserSuspended).await);

    sweep(&engine, &permits).await.unwrap();
    assert_eq!(status(&store, task.id).await, TaskStatus::Suspended);

    let view = operator.resume(task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::OnCpu);
    assert!(wait_for_state(&driver, &handle, JobState::Running).await);

    let view = operator.terminate(task.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Terminated);
    assert!(wait_for_state(&driver, &handle, JobState::Undetermined).await);
}
