//! Operator requests: control actions, recovery and restart.
//!
//! These wait for the task lock instead of skipping a busy task.

use tracing::{debug, info, warn};

use super::engine::Engine;
use crate::domain::{JobHandle, Stage, TaskId, TaskRecord, TaskStatus};
use crate::driver::ControlAction;
use crate::error::EngineError;

impl Engine {
    /// Forward `action` to the driver. Without an outstanding job this is a
    /// no-op. A driver failure leaves the status untouched and is returned.
    pub async fn control(&self, id: TaskId, action: ControlAction) -> Result<TaskRecord, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut task = self.store.load(id).await?;

        let Some(raw) = task.cluster_jobid.clone() else {
            debug!(task_id = %id, %action, status = %task.status, "no cluster job, nothing to do");
            return Ok(task);
        };
        let handle = JobHandle::new(raw);

        if let Err(e) = self.driver.control(action, &handle).await {
            warn!(task_id = %id, %action, %handle, error = %e, "control action failed");
            task.add_log(format!("{action} of job {handle} failed: {e}"), self.clock.now());
            if let Err(save_err) = self.persist(&task).await {
                warn!(task_id = %id, error = %save_err, "cannot record control failure");
            }
            return Err(e.into());
        }
        self.invalidate_job(&handle).await;

        let from = task.status;
        let next = match action {
            ControlAction::Hold => TaskStatus::OnHold,
            ControlAction::Release => TaskStatus::Queued,
            ControlAction::Suspend => TaskStatus::Suspended,
            ControlAction::Resume => TaskStatus::OnCpu,
            ControlAction::Terminate => TaskStatus::Terminated,
        };
        let now = self.clock.now();
        if from != next {
            task.transition(next, now)?;
        }
        task.add_log(format!("{action} of job {handle}"), now);

        let kind = self.kind(&task)?;
        let outcome = {
            let mut ctx = self.context(&mut task);
            kind.after_control(&mut ctx, action).await
        };
        if let Err(e) = outcome {
            warn!(task_id = %id, %action, error = %e, "after_control hook failed");
            task.add_log(format!("after {action}: {e}"), self.clock.now());
        }
        self.commit(task, from).await
    }

    pub async fn hold(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        self.control(id, ControlAction::Hold).await
    }

    pub async fn release(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        self.control(id, ControlAction::Release).await
    }

    pub async fn suspend(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        self.control(id, ControlAction::Suspend).await
    }

    pub async fn resume(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        self.control(id, ControlAction::Resume).await
    }

    pub async fn terminate(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        self.control(id, ControlAction::Terminate).await
    }

    /// Send a failed task to the recovery state of the stage it failed in.
    pub async fn recover(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut task = self.store.load(id).await?;
        let Some(stage) = task.status.failed_stage() else {
            return Err(EngineError::InvalidRequest(format!(
                "{id} is '{}', only failed tasks can be recovered",
                task.status
            )));
        };
        self.enter_meta(&mut task, stage.recover_status(), format!("recovery of {stage} requested"))
            .await
    }

    /// Send a finished task to the restart state of `stage`.
    ///
    /// `stage` may not lie past the stage the task finished in: a task that
    /// failed setup has no job outputs to post-process.
    pub async fn restart(&self, id: TaskId, stage: Stage) -> Result<TaskRecord, EngineError> {
        let _guard = self.locks.acquire(id).await;
        let mut task = self.store.load(id).await?;
        let Some(limit) = task.restart_limit() else {
            return Err(EngineError::InvalidRequest(format!(
                "{id} is '{}', only completed, terminated or failed tasks can be restarted",
                task.status
            )));
        };
        if stage > limit {
            return Err(EngineError::InvalidRequest(format!(
                "{id} is '{}', it can be restarted at {limit} at the latest, not at {stage}",
                task.status
            )));
        }
        self.enter_meta(&mut task, stage.restart_status(), format!("restart at {stage} requested"))
            .await
    }

    async fn enter_meta(&self, task: &mut TaskRecord, meta: TaskStatus, note: String) -> Result<TaskRecord, EngineError> {
        let from = task.status;
        let now = self.clock.now();
        task.enter_meta_state(meta, now)?;
        task.add_log(note, now);
        let saved = self.persist(task).await?;
        info!(task_id = %saved.id, from = %from, status = %saved.status, "operator request accepted");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use crate::domain::{Gate, JobHandle, JobState, Stage, TaskId, TaskStatus};
    use crate::driver::ControlAction;
    use crate::error::EngineError;
    use crate::lifecycle::testing::{StubKind, TestEngine};
    use crate::lifecycle::TaskPaths;

    async fn queued(t: &TestEngine) -> (TaskId, JobHandle) {
        let task = t.add(t.engine.new_task("stub", Default::default())).await;
        t.sweep().await;
        let handle = JobHandle::new(t.load(task.id).await.cluster_jobid.unwrap());
        (task.id, handle)
    }

    #[tokio::test]
    async fn hold_and_release_follow_the_driver() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let (id, handle) = queued(&t).await;

        let held = t.engine.hold(id).await.unwrap();
        assert_eq!(held.status, TaskStatus::OnHold);
        assert_eq!(t.driver.state(&handle), Some(JobState::UserOnHold));

        t.sweep().await;
        assert_eq!(t.status(id).await, TaskStatus::OnHold);

        let released = t.engine.release(id).await.unwrap();
        assert_eq!(released.status, TaskStatus::Queued);
        assert_eq!(
            t.driver.controls(),
            vec![(ControlAction::Hold, handle.clone()), (ControlAction::Release, handle)]
        );
    }

    #[tokio::test]
    async fn control_without_a_job_is_a_no_op() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;

        let same = t.engine.suspend(task.id).await.unwrap();
        assert_eq!(same.status, TaskStatus::New);
        assert!(t.driver.controls().is_empty());
    }

    #[tokio::test]
    async fn failed_control_keeps_status_and_logs() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let (id, handle) = queued(&t).await;
        t.driver.finish(&handle);

        let err = t.engine.hold(id).await.unwrap_err();
        assert!(matches!(err, EngineError::Driver(_)));
        let task = t.load(id).await;
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.log.last().unwrap().message.contains("hold of job"));
    }

    #[tokio::test]
    async fn terminate_cascades_and_notifies_the_kind() {
        let kind = Arc::new(StubKind::new("stub"));
        let t = TestEngine::new(vec![kind.clone()]);
        let (id, _) = queued(&t).await;
        let mut waiting = t.engine.new_task("stub", Default::default());
        waiting
            .add_prerequisite(Gate::ForSetup, id, TaskStatus::Completed)
            .unwrap();
        let waiting = t.add(waiting).await;

        let terminated = t.engine.terminate(id).await.unwrap();
        assert_eq!(terminated.status, TaskStatus::Terminated);
        assert!(terminated.cluster_jobid.is_none());
        assert_eq!(kind.controls(), vec![ControlAction::Terminate]);
        assert_eq!(t.status(waiting.id).await, TaskStatus::FailedSetupPrerequisites);
    }

    #[tokio::test]
    async fn control_invalidates_the_running_sweep() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let (id, _) = queued(&t).await;

        let cache = t.engine.begin_sweep();
        assert!(cache.ensure_loaded().await);
        t.engine.suspend(id).await.unwrap();
        let before = t.driver.single_queries();

        t.engine.advance(id, &cache).await.unwrap();
        t.engine.end_sweep();
        assert_eq!(t.driver.single_queries(), before + 1);
        assert_eq!(t.status(id).await, TaskStatus::Suspended);
    }

    #[tokio::test]
    async fn recovery_reenters_the_failed_stage() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub").accepting_recovery())]);
        t.driver.set_reject_submissions(true);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;
        t.sweep().await;
        assert_eq!(t.status(task.id).await, TaskStatus::FailedOnCluster);

        t.driver.set_reject_submissions(false);
        let recovering = t.engine.recover(task.id).await.unwrap();
        assert_eq!(recovering.status, TaskStatus::RecoverCluster);

        t.sweep().await;
        let requeued = t.load(task.id).await;
        assert_eq!(requeued.status, TaskStatus::Queued);
        assert!(requeued.cluster_jobid.is_some());
        assert!(requeued.prior_status.is_none());
    }

    #[tokio::test]
    async fn refused_recovery_returns_to_the_failure() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub").failing_setup())]);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;
        t.sweep().await;

        t.engine.recover(task.id).await.unwrap();
        t.sweep().await;
        let back = t.load(task.id).await;
        assert_eq!(back.status, TaskStatus::FailedToSetup);
        assert!(back.log.last().unwrap().message.contains("declined"));
    }

    #[tokio::test]
    async fn recover_requires_a_failure() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;

        let err = t.engine.recover(task.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
        let err = t.engine.restart(task.id, Stage::Setup).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn restart_at_setup_starts_a_new_run() {
        let kind = Arc::new(StubKind::new("stub").accepting_restart());
        let t = TestEngine::new(vec![kind.clone()]);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;
        t.run_to_rest().await;
        assert_eq!(t.status(task.id).await, TaskStatus::Completed);

        t.engine.restart(task.id, Stage::Setup).await.unwrap();
        t.run_to_rest().await;
        let rerun = t.load(task.id).await;
        assert_eq!(rerun.status, TaskStatus::Completed);
        assert_eq!(rerun.run_number, 1);
        assert_eq!(kind.setup_calls(), 2);
        assert_eq!(t.driver.submissions().len(), 2);
    }

    #[tokio::test]
    async fn restart_post_processing_carries_outputs() {
        let kind = Arc::new(StubKind::new("stub").accepting_restart());
        let t = TestEngine::new(vec![kind.clone()]);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;
        t.run_to_rest().await;

        let first = TaskPaths::new(t.dir.path(), &t.load(task.id).await);
        std::fs::write(&first.stdout, "result\n").unwrap();

        t.engine.restart(task.id, Stage::PostProcessing).await.unwrap();
        t.run_to_rest().await;
        let rerun = t.load(task.id).await;
        assert_eq!(rerun.status, TaskStatus::Completed);
        assert_eq!(kind.save_calls(), 2);
        assert_eq!(t.driver.submissions().len(), 1);
        let second = TaskPaths::new(t.dir.path(), &rerun);
        assert_eq!(std::fs::read_to_string(second.stdout).unwrap(), "result\n");
    }

    #[tokio::test]
    async fn refused_restart_returns_to_prior_status() {
        let t = TestEngine::new(vec![Arc::new(StubKind::new("stub"))]);
        let task = t.add(t.engine.new_task("stub", Default::default())).await;
        t.run_to_rest().await;

        let restarting = t.engine.restart(task.id, Stage::Cluster).await.unwrap();
        assert_eq!(restarting.status, TaskStatus::RestartCluster);
        t.sweep().await;
        let back = t.load(task.id).await;
        assert_eq!(back.status, TaskStatus::Completed);
        assert_eq!(back.run_number, 0);
    }

    #[tokio::test]
    async fn second_terminate_changes_nothing() {
        let kind = Arc::new(StubKind::new("stub"));
        let t = TestEngine::new(vec![kind.clone()]);
        let (id, _) = queued(&t).await;

        let first = t.engine.terminate(id).await.unwrap();
        let controls = t.driver.controls().len();

        let second = t.engine.terminate(id).await.unwrap();
        assert_eq!(second.status, TaskStatus::Terminated);
        assert_eq!(second.log.len(), first.log.len());
        assert_eq!(second.history.len(), first.history.len());
        assert_eq!(second.version, first.version);
        assert_eq!(t.driver.controls().len(), controls);
        assert_eq!(kind.controls(), vec![ControlAction::Terminate]);
    }

    #[derive(Debug, Clone, Copy)]
    enum Ending {
        Completed,
        FailedSetup,
        FailedSubmission,
        TerminatedWhileQueued,
    }

    async fn ended(ending: Ending) -> (TestEngine, TaskId) {
        let kind = match ending {
            Ending::FailedSetup => StubKind::new("stub").failing_setup(),
            _ => StubKind::new("stub"),
        };
        let t = TestEngine::new(vec![Arc::new(kind)]);
        t.driver.set_reject_submissions(matches!(ending, Ending::FailedSubmission));
        let id = match ending {
            Ending::TerminatedWhileQueued => {
                let (id, _) = queued(&t).await;
                t.engine.terminate(id).await.unwrap();
                id
            }
            _ => {
                let task = t.add(t.engine.new_task("stub", Default::default())).await;
                t.run_to_rest().await;
                task.id
            }
        };
        (t, id)
    }

    #[rstest]
    #[case::completed_setup(Ending::Completed, Stage::Setup, true)]
    #[case::completed_cluster(Ending::Completed, Stage::Cluster, true)]
    #[case::completed_post_processing(Ending::Completed, Stage::PostProcessing, true)]
    #[case::failed_setup_setup(Ending::FailedSetup, Stage::Setup, true)]
    #[case::failed_setup_cluster(Ending::FailedSetup, Stage::Cluster, false)]
    #[case::failed_setup_post_processing(Ending::FailedSetup, Stage::PostProcessing, false)]
    #[case::failed_submission_cluster(Ending::FailedSubmission, Stage::Cluster, true)]
    #[case::failed_submission_post_processing(Ending::FailedSubmission, Stage::PostProcessing, false)]
    #[case::terminated_cluster(Ending::TerminatedWhileQueued, Stage::Cluster, true)]
    #[case::terminated_post_processing(Ending::TerminatedWhileQueued, Stage::PostProcessing, false)]
    #[tokio::test]
    async fn restart_stops_at_the_stage_the_task_ended_in(
        #[case] ending: Ending,
        #[case] stage: Stage,
        #[case] accepted: bool,
    ) {
        let (t, id) = ended(ending).await;
        let before = t.load(id).await;
        let submissions = t.driver.submissions().len();

        let outcome = t.engine.restart(id, stage).await;
        if accepted {
            assert_eq!(outcome.unwrap().status, stage.restart_status());
            return;
        }
        assert!(matches!(outcome, Err(EngineError::InvalidRequest(_))), "{ending:?} at {stage}");
        t.run_to_rest().await;
        let after = t.load(id).await;
        assert_eq!(after.status, before.status);
        assert_eq!(after.run_number, 0);
        assert_eq!(after.version, before.version);
        assert_eq!(t.driver.submissions().len(), submissions);
    }
}
