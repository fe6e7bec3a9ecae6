//! Task record: the durable state of one unit of work.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ids::{BatchId, TaskId};
use super::prerequisite::{Gate, InvalidPrerequisite, Prerequisites};
use super::status::{Stage, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("illegal transition for {task}: '{from}' -> '{to}'")]
    Illegal {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("{task} cannot enter '{to}' without a cluster job")]
    MissingClusterJob { task: TaskId, to: TaskStatus },
}

/// One entry of the status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// One entry of the task's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// The single source of truth for a task.
///
/// State changes go through methods so the invariants hold:
/// - transitions follow `TaskStatus::can_transition_to`
/// - `cluster_jobid` is set exactly while the status holds a cluster job
/// - `history` and `log` only grow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,

    /// Tool-specific parameters (always a JSON object).
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Execution node that owns the task.
    pub bourreau_id: String,

    #[serde(default)]
    pub batch_id: Option<BatchId>,

    /// Ordering within a batch.
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub level: u32,

    /// Incremented on every accepted restart.
    #[serde(default)]
    pub run_number: u32,

    /// Driver handle of the outstanding job.
    #[serde(default)]
    pub cluster_jobid: Option<String>,

    /// Stop at `Configured` after setup: a parallelizer runs the script.
    #[serde(default)]
    pub configure_only: bool,

    #[serde(default)]
    pub prerequisites: Prerequisites,

    /// Status held before entering a recover/restart meta-state.
    #[serde(default)]
    pub prior_status: Option<TaskStatus>,

    #[serde(default)]
    pub history: Vec<StatusTransition>,

    #[serde(default)]
    pub log: Vec<LogEntry>,

    /// Optimistic concurrency counter, bumped by the store on every save.
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        task_type: impl Into<String>,
        bourreau_id: impl Into<String>,
        params: serde_json::Map<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            status: TaskStatus::New,
            params,
            bourreau_id: bourreau_id.into(),
            batch_id: None,
            rank: 0,
            level: 0,
            run_number: 0,
            cluster_jobid: None,
            configure_only: false,
            prerequisites: Prerequisites::default(),
            prior_status: None,
            history: Vec::new(),
            log: Vec::new(),
            version: 0,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_batch(mut self, batch_id: BatchId, rank: u32) -> Self {
        self.batch_id = Some(batch_id);
        self.rank = rank;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn add_prerequisite(
        &mut self,
        gate: Gate,
        target: TaskId,
        required: TaskStatus,
    ) -> Result<(), InvalidPrerequisite> {
        self.prerequisites.add(self.id, gate, target, required)
    }

    pub fn remove_prerequisite(&mut self, gate: Gate, target: TaskId) -> bool {
        self.prerequisites.remove(gate, target)
    }

    /// Move to `next`, recording history. Leaving the cluster range clears the handle.
    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                task: self.id,
                from: self.status,
                to: next,
            });
        }
        if next.holds_cluster_job() && self.cluster_jobid.is_none() {
            return Err(TransitionError::MissingClusterJob {
                task: self.id,
                to: next,
            });
        }
        if !next.holds_cluster_job() {
            self.cluster_jobid = None;
        }
        self.history.push(StatusTransition {
            from: self.status,
            to: next,
            at: now,
        });
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Enter a recover/restart meta-state, remembering where to come back to.
    pub fn enter_meta_state(&mut self, meta: TaskStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let prior = self.status;
        self.transition(meta, now)?;
        self.prior_status = Some(prior);
        Ok(())
    }

    /// Leave a meta-state for the status held before it.
    pub fn return_to_prior(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let fallback = match self.status {
            TaskStatus::RecoverSetup => TaskStatus::FailedToSetup,
            TaskStatus::RecoverCluster => TaskStatus::FailedOnCluster,
            TaskStatus::RecoverPostProcess => TaskStatus::FailedToPostProcess,
            _ => TaskStatus::Completed,
        };
        let prior = self.prior_status.take().unwrap_or(fallback);
        self.transition(prior, now)
    }

    /// Latest stage a restart may re-enter: nothing past the stage the task
    /// finished in. `None` unless the task is completed, terminated or failed.
    pub fn restart_limit(&self) -> Option<Stage> {
        match self.status {
            TaskStatus::Completed | TaskStatus::FailedToPostProcess => Some(Stage::PostProcessing),
            TaskStatus::FailedSetupPrerequisites | TaskStatus::FailedToSetup => Some(Stage::Setup),
            TaskStatus::FailedOnCluster => Some(Stage::Cluster),
            // Reachable from several stages: look at where the task stood.
            TaskStatus::Terminated | TaskStatus::FailedPostProcessPrerequisites => Some(
                self.history
                    .iter()
                    .rev()
                    .filter(|t| t.to == self.status)
                    .find_map(|t| t.from.stage())
                    .unwrap_or(Stage::Setup),
            ),
            _ => None,
        }
    }

    /// Record the handle of a freshly submitted job.
    pub fn attach_job(&mut self, handle: impl Into<String>, now: DateTime<Utc>) {
        self.cluster_jobid = Some(handle.into());
        self.submitted_at = Some(now);
        self.updated_at = now;
    }

    /// Accepted restart: new run, stage-local state cleared.
    pub fn begin_new_run(&mut self, now: DateTime<Utc>) {
        self.run_number += 1;
        self.cluster_jobid = None;
        self.submitted_at = None;
        self.prior_status = None;
        self.updated_at = now;
    }

    pub fn add_log(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.log.push(LogEntry {
            at: now,
            message: message.into(),
        });
        self.updated_at = now;
    }

    /// Decode the params bag into a typed struct.
    pub fn params_as<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(self.params.clone()))
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.params.insert(key.into(), value);
    }

    /// Human readable name used for driver job names and log lines.
    pub fn display_name(&self) -> String {
        format!("{}-{}-{}", self.task_type, self.id.as_ulid(), self.run_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn record() -> TaskRecord {
        TaskRecord::new(TaskId::generate(), "shell", "node-1", Default::default(), now())
    }

    #[test]
    fn new_record_starts_as_new() {
        let task = record();
        assert_eq!(task.status, TaskStatus::New);
        assert_eq!(task.run_number, 0);
        assert!(task.cluster_jobid.is_none());
        assert!(task.history.is_empty());
    }

    #[test]
    fn entering_cluster_range_requires_a_job() {
        let mut task = record();
        task.transition(TaskStatus::SettingUp, now()).unwrap();

        let err = task.transition(TaskStatus::Queued, now()).unwrap_err();
        assert!(matches!(err, TransitionError::MissingClusterJob { .. }));

        task.attach_job("4242", now());
        task.transition(TaskStatus::Queued, now()).unwrap();
        assert_eq!(task.cluster_jobid.as_deref(), Some("4242"));
    }

    #[test]
    fn leaving_cluster_range_clears_the_job() {
        let mut task = record();
        task.transition(TaskStatus::SettingUp, now()).unwrap();
        task.attach_job("17", now());
        task.transition(TaskStatus::Queued, now()).unwrap();
        task.transition(TaskStatus::OnCpu, now()).unwrap();
        assert!(task.cluster_jobid.is_some());

        task.transition(TaskStatus::DataReady, now()).unwrap();
        assert!(task.cluster_jobid.is_none());
        assert_eq!(task.history.len(), 4);
    }

    #[test]
    fn illegal_transition_leaves_record_untouched() {
        let mut task = record();
        let err = task.transition(TaskStatus::Completed, now()).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
        assert_eq!(task.status, TaskStatus::New);
        assert!(task.history.is_empty());
    }

    #[test]
    fn meta_state_returns_to_prior_status() {
        let mut task = record();
        task.transition(TaskStatus::SettingUp, now()).unwrap();
        task.transition(TaskStatus::FailedToSetup, now()).unwrap();

        task.enter_meta_state(TaskStatus::RestartSetup, now()).unwrap();
        assert_eq!(task.prior_status, Some(TaskStatus::FailedToSetup));

        task.return_to_prior(now()).unwrap();
        assert_eq!(task.status, TaskStatus::FailedToSetup);
        assert!(task.prior_status.is_none());
    }

    /// Record walked through `path`, attaching a job where one is needed.
    fn walked(path: &[TaskStatus]) -> TaskRecord {
        let mut task = record();
        for &status in path {
            if status.holds_cluster_job() && task.cluster_jobid.is_none() {
                task.attach_job("7", now());
            }
            if matches!(status, TaskStatus::RestartSetup | TaskStatus::RestartCluster) {
                task.enter_meta_state(status, now()).unwrap();
            } else if task.prior_status.is_some() {
                task.return_to_prior(now()).unwrap();
            } else {
                task.transition(status, now()).unwrap();
            }
        }
        task
    }

    #[rstest]
    #[case::completed(&[TaskStatus::SettingUp, TaskStatus::Queued, TaskStatus::DataReady, TaskStatus::PostProcessing, TaskStatus::Completed], Some(Stage::PostProcessing))]
    #[case::failed_to_post_process(&[TaskStatus::SettingUp, TaskStatus::Queued, TaskStatus::DataReady, TaskStatus::PostProcessing, TaskStatus::FailedToPostProcess], Some(Stage::PostProcessing))]
    #[case::failed_to_setup(&[TaskStatus::SettingUp, TaskStatus::FailedToSetup], Some(Stage::Setup))]
    #[case::failed_setup_prerequisites(&[TaskStatus::FailedSetupPrerequisites], Some(Stage::Setup))]
    #[case::failed_on_cluster(&[TaskStatus::SettingUp, TaskStatus::Queued, TaskStatus::FailedOnCluster], Some(Stage::Cluster))]
    #[case::terminated_on_cpu(&[TaskStatus::SettingUp, TaskStatus::Queued, TaskStatus::OnCpu, TaskStatus::Terminated], Some(Stage::Cluster))]
    #[case::terminated_after_job(&[TaskStatus::SettingUp, TaskStatus::Queued, TaskStatus::DataReady, TaskStatus::Terminated], Some(Stage::PostProcessing))]
    #[case::member_lost_its_wrapper(&[TaskStatus::SettingUp, TaskStatus::Configured, TaskStatus::FailedPostProcessPrerequisites], Some(Stage::Cluster))]
    #[case::declined_restart_keeps_limit(&[TaskStatus::SettingUp, TaskStatus::Queued, TaskStatus::Terminated, TaskStatus::RestartSetup, TaskStatus::Terminated], Some(Stage::Cluster))]
    #[case::still_running(&[TaskStatus::SettingUp, TaskStatus::Queued], None)]
    fn restart_limit_is_the_finishing_stage(#[case] path: &[TaskStatus], #[case] expected: Option<Stage>) {
        assert_eq!(walked(path).restart_limit(), expected);
    }

    #[test]
    fn params_decode_into_typed_struct() {
        #[derive(Deserialize)]
        struct P {
            commands: Vec<String>,
        }
        let mut task = record();
        task.set_param("commands", serde_json::json!(["echo hi"]));
        let p: P = task.params_as().unwrap();
        assert_eq!(p.commands, vec!["echo hi".to_string()]);
    }

    #[test]
    fn record_roundtrips_through_json() {
        let mut task = record();
        task.add_prerequisite(Gate::ForSetup, TaskId::generate(), TaskStatus::Completed)
            .unwrap();
        task.add_log("created", now());
        let json = serde_json::to_string(&task).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.prerequisites, task.prerequisites);
        assert_eq!(back.log, task.log);
    }
}
