//! Task status and the transition table of the lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage. Recovery and restart requests are addressed per stage.
///
/// Ordered along the success path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Cluster,
    PostProcessing,
}

impl Stage {
    pub fn recover_status(self) -> TaskStatus {
        match self {
            Stage::Setup => TaskStatus::RecoverSetup,
            Stage::Cluster => TaskStatus::RecoverCluster,
            Stage::PostProcessing => TaskStatus::RecoverPostProcess,
        }
    }

    pub fn restart_status(self) -> TaskStatus {
        match self {
            Stage::Setup => TaskStatus::RestartSetup,
            Stage::Cluster => TaskStatus::RestartCluster,
            Stage::PostProcessing => TaskStatus::RestartPostProcess,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Setup => f.write_str("setup"),
            Stage::Cluster => f.write_str("cluster"),
            Stage::PostProcessing => f.write_str("post processing"),
        }
    }
}

/// Task status.
///
/// Canonical path:
/// `New -> Setting Up -> Queued -> On CPU -> Data Ready -> Post Processing -> Completed`
///
/// Every stage has a `Failed *` status. A failed task can be sent to the
/// matching `Recover *` status, and any finished task (completed, terminated
/// or failed) can be sent to a `Restart *` status. Both meta-states are
/// resolved by the engine on the next sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "New")]
    New,
    #[serde(rename = "Setting Up")]
    SettingUp,
    #[serde(rename = "Configured")]
    Configured,
    #[serde(rename = "Queued")]
    Queued,
    #[serde(rename = "On Hold")]
    OnHold,
    #[serde(rename = "On CPU")]
    OnCpu,
    #[serde(rename = "Suspended")]
    Suspended,
    #[serde(rename = "Data Ready")]
    DataReady,
    #[serde(rename = "Post Processing")]
    PostProcessing,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Terminated")]
    Terminated,

    #[serde(rename = "Failed Setup Prerequisites")]
    FailedSetupPrerequisites,
    #[serde(rename = "Failed To Setup")]
    FailedToSetup,
    #[serde(rename = "Failed On Cluster")]
    FailedOnCluster,
    #[serde(rename = "Failed PostProcess Prerequisites")]
    FailedPostProcessPrerequisites,
    #[serde(rename = "Failed To PostProcess")]
    FailedToPostProcess,

    #[serde(rename = "Recover Setup")]
    RecoverSetup,
    #[serde(rename = "Recover Cluster")]
    RecoverCluster,
    #[serde(rename = "Recover PostProcess")]
    RecoverPostProcess,
    #[serde(rename = "Restart Setup")]
    RestartSetup,
    #[serde(rename = "Restart Cluster")]
    RestartCluster,
    #[serde(rename = "Restart PostProcess")]
    RestartPostProcess,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 22] = [
        TaskStatus::New,
        TaskStatus::SettingUp,
        TaskStatus::Configured,
        TaskStatus::Queued,
        TaskStatus::OnHold,
        TaskStatus::OnCpu,
        TaskStatus::Suspended,
        TaskStatus::DataReady,
        TaskStatus::PostProcessing,
        TaskStatus::Completed,
        TaskStatus::Terminated,
        TaskStatus::FailedSetupPrerequisites,
        TaskStatus::FailedToSetup,
        TaskStatus::FailedOnCluster,
        TaskStatus::FailedPostProcessPrerequisites,
        TaskStatus::FailedToPostProcess,
        TaskStatus::RecoverSetup,
        TaskStatus::RecoverCluster,
        TaskStatus::RecoverPostProcess,
        TaskStatus::RestartSetup,
        TaskStatus::RestartCluster,
        TaskStatus::RestartPostProcess,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "New",
            TaskStatus::SettingUp => "Setting Up",
            TaskStatus::Configured => "Configured",
            TaskStatus::Queued => "Queued",
            TaskStatus::OnHold => "On Hold",
            TaskStatus::OnCpu => "On CPU",
            TaskStatus::Suspended => "Suspended",
            TaskStatus::DataReady => "Data Ready",
            TaskStatus::PostProcessing => "Post Processing",
            TaskStatus::Completed => "Completed",
            TaskStatus::Terminated => "Terminated",
            TaskStatus::FailedSetupPrerequisites => "Failed Setup Prerequisites",
            TaskStatus::FailedToSetup => "Failed To Setup",
            TaskStatus::FailedOnCluster => "Failed On Cluster",
            TaskStatus::FailedPostProcessPrerequisites => "Failed PostProcess Prerequisites",
            TaskStatus::FailedToPostProcess => "Failed To PostProcess",
            TaskStatus::RecoverSetup => "Recover Setup",
            TaskStatus::RecoverCluster => "Recover Cluster",
            TaskStatus::RecoverPostProcess => "Recover PostProcess",
            TaskStatus::RestartSetup => "Restart Setup",
            TaskStatus::RestartCluster => "Restart Cluster",
            TaskStatus::RestartPostProcess => "Restart PostProcess",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::FailedSetupPrerequisites
                | TaskStatus::FailedToSetup
                | TaskStatus::FailedOnCluster
                | TaskStatus::FailedPostProcessPrerequisites
                | TaskStatus::FailedToPostProcess
        )
    }

    /// No further transition happens without an explicit recover/restart request.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Terminated) || self.is_failure()
    }

    /// A dependent waiting on a task in this status will never be satisfied.
    pub fn is_dead_end(self) -> bool {
        self == TaskStatus::Terminated || self.is_failure()
    }

    /// Statuses during which the task owns exactly one driver job.
    pub fn holds_cluster_job(self) -> bool {
        matches!(
            self,
            TaskStatus::Queued | TaskStatus::OnHold | TaskStatus::OnCpu | TaskStatus::Suspended
        )
    }

    /// Stage whose failure this status represents.
    pub fn failed_stage(self) -> Option<Stage> {
        match self {
            TaskStatus::FailedSetupPrerequisites | TaskStatus::FailedToSetup => Some(Stage::Setup),
            TaskStatus::FailedOnCluster => Some(Stage::Cluster),
            TaskStatus::FailedPostProcessPrerequisites | TaskStatus::FailedToPostProcess => {
                Some(Stage::PostProcessing)
            }
            _ => None,
        }
    }

    /// Stage a success-path status belongs to. `Configured` counts as cluster:
    /// the task is set up and only waits for its job.
    pub fn stage(self) -> Option<Stage> {
        match self {
            TaskStatus::New | TaskStatus::SettingUp => Some(Stage::Setup),
            TaskStatus::Configured
            | TaskStatus::Queued
            | TaskStatus::OnHold
            | TaskStatus::OnCpu
            | TaskStatus::Suspended => Some(Stage::Cluster),
            TaskStatus::DataReady | TaskStatus::PostProcessing | TaskStatus::Completed => {
                Some(Stage::PostProcessing)
            }
            _ => None,
        }
    }

    /// Position along the success path. `None` off the path.
    ///
    /// `On Hold` ranks with `Queued` and `Suspended` with `On CPU`: both are
    /// side states of the same stage.
    pub fn progress(self) -> Option<u8> {
        match self {
            TaskStatus::New => Some(0),
            TaskStatus::SettingUp => Some(1),
            TaskStatus::Configured => Some(2),
            TaskStatus::Queued | TaskStatus::OnHold => Some(3),
            TaskStatus::OnCpu | TaskStatus::Suspended => Some(4),
            TaskStatus::DataReady => Some(5),
            TaskStatus::PostProcessing => Some(6),
            TaskStatus::Completed => Some(7),
            _ => None,
        }
    }

    /// "Reached or passed" on the success path.
    pub fn has_reached(self, required: TaskStatus) -> bool {
        match (self.progress(), required.progress()) {
            (Some(current), Some(wanted)) => current >= wanted,
            _ => false,
        }
    }

    /// Statuses the poll loop looks at.
    pub fn needs_attention(self) -> bool {
        matches!(
            self,
            TaskStatus::New
                | TaskStatus::Configured
                | TaskStatus::Queued
                | TaskStatus::OnHold
                | TaskStatus::OnCpu
                | TaskStatus::Suspended
                | TaskStatus::DataReady
                | TaskStatus::RecoverSetup
                | TaskStatus::RecoverCluster
                | TaskStatus::RecoverPostProcess
                | TaskStatus::RestartSetup
                | TaskStatus::RestartCluster
                | TaskStatus::RestartPostProcess
        )
    }

    /// Transition table.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self == next {
            return false;
        }
        match self {
            New => matches!(next, SettingUp | FailedSetupPrerequisites),
            SettingUp => matches!(next, Configured | Queued | FailedToSetup | FailedOnCluster),
            Configured => matches!(next, DataReady | Terminated | FailedPostProcessPrerequisites),
            Queued => matches!(
                next,
                OnHold | OnCpu | Suspended | DataReady | Terminated | FailedOnCluster
            ),
            OnHold => matches!(
                next,
                Queued | OnCpu | Suspended | DataReady | Terminated | FailedOnCluster
            ),
            OnCpu => matches!(
                next,
                Queued | OnHold | Suspended | DataReady | Terminated | FailedOnCluster
            ),
            Suspended => matches!(
                next,
                Queued | OnHold | OnCpu | DataReady | Terminated | FailedOnCluster
            ),
            DataReady => matches!(
                next,
                PostProcessing | FailedPostProcessPrerequisites | Terminated
            ),
            PostProcessing => matches!(next, Completed | FailedToPostProcess),
            Completed | Terminated => matches!(next, RestartSetup | RestartCluster | RestartPostProcess),
            FailedSetupPrerequisites | FailedToSetup | FailedOnCluster
            | FailedPostProcessPrerequisites | FailedToPostProcess => {
                let recover = self.failed_stage().map(Stage::recover_status);
                Some(next) == recover
                    || matches!(next, RestartSetup | RestartCluster | RestartPostProcess)
            }
            // Meta-states resolve to the re-entered stage or back to where the
            // task came from, which may be any terminal status.
            RecoverSetup => matches!(next, New) || next.is_failure(),
            RecoverCluster => matches!(next, Queued) || next.is_failure(),
            RecoverPostProcess => matches!(next, DataReady) || next.is_failure(),
            RestartSetup => matches!(next, New) || next.is_terminal(),
            RestartCluster => matches!(next, Queued) || next.is_terminal(),
            RestartPostProcess => matches!(next, DataReady) || next.is_terminal(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
