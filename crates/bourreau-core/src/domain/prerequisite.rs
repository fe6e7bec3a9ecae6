//! Prerequisite edges and their evaluation.
//!
//! Edges live on the dependent task: `dependent --(gate)--> target` means the
//! dependent cannot enter the gated stage before `target` has reached
//! `required` on the success path.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::status::TaskStatus;

/// The stage an edge gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    ForSetup,
    ForPostProcessing,
}

impl Gate {
    /// Status a dependent cascades into when this gate can never open.
    pub fn failure_status(self) -> TaskStatus {
        match self {
            Gate::ForSetup => TaskStatus::FailedSetupPrerequisites,
            Gate::ForPostProcessing => TaskStatus::FailedPostProcessPrerequisites,
        }
    }

    /// Whether a task must pass this gate to reach `status`.
    pub fn lies_before(self, status: TaskStatus) -> bool {
        let gate_at = match self {
            Gate::ForSetup => TaskStatus::SettingUp,
            Gate::ForPostProcessing => TaskStatus::PostProcessing,
        };
        status.has_reached(gate_at)
    }

    /// Dependent statuses in which this gate has not been passed yet.
    pub fn is_waiting_in(self, status: TaskStatus) -> bool {
        match self {
            Gate::ForSetup => status == TaskStatus::New,
            Gate::ForPostProcessing => {
                matches!(status, TaskStatus::Configured | TaskStatus::DataReady)
            }
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::ForSetup => f.write_str("for_setup"),
            Gate::ForPostProcessing => f.write_str("for_post_processing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPrerequisite {
    #[error("`{0}` is not on the success path and cannot be required")]
    UnreachableStatus(TaskStatus),

    #[error("a task cannot depend on itself")]
    SelfReference,
}

/// Outgoing edges of one task, per gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisites {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    for_setup: BTreeMap<TaskId, TaskStatus>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    for_post_processing: BTreeMap<TaskId, TaskStatus>,
}

impl Prerequisites {
    fn gate(&self, gate: Gate) -> &BTreeMap<TaskId, TaskStatus> {
        match gate {
            Gate::ForSetup => &self.for_setup,
            Gate::ForPostProcessing => &self.for_post_processing,
        }
    }

    fn gate_mut(&mut self, gate: Gate) -> &mut BTreeMap<TaskId, TaskStatus> {
        match gate {
            Gate::ForSetup => &mut self.for_setup,
            Gate::ForPostProcessing => &mut self.for_post_processing,
        }
    }

    /// Register (or replace) an edge. Only success-path statuses can be required.
    pub fn add(
        &mut self,
        owner: TaskId,
        gate: Gate,
        target: TaskId,
        required: TaskStatus,
    ) -> Result<(), InvalidPrerequisite> {
        if owner == target {
            return Err(InvalidPrerequisite::SelfReference);
        }
        if required.progress().is_none() {
            return Err(InvalidPrerequisite::UnreachableStatus(required));
        }
        self.gate_mut(gate).insert(target, required);
        Ok(())
    }

    pub fn remove(&mut self, gate: Gate, target: TaskId) -> bool {
        self.gate_mut(gate).remove(&target).is_some()
    }

    /// Drop every edge of a gate (after the gate was passed).
    pub fn clear(&mut self, gate: Gate) {
        self.gate_mut(gate).clear();
    }

    pub fn edges(&self, gate: Gate) -> impl Iterator<Item = (TaskId, TaskStatus)> + '_ {
        self.gate(gate).iter().map(|(id, status)| (*id, *status))
    }

    pub fn required(&self, gate: Gate, target: TaskId) -> Option<TaskStatus> {
        self.gate(gate).get(&target).copied()
    }

    pub fn is_empty(&self, gate: Gate) -> bool {
        self.gate(gate).is_empty()
    }

    /// Every (gate, target) pair.
    pub fn all_edges(&self) -> impl Iterator<Item = (Gate, TaskId, TaskStatus)> + '_ {
        self.edges(Gate::ForSetup)
            .map(|(id, st)| (Gate::ForSetup, id, st))
            .chain(
                self.edges(Gate::ForPostProcessing)
                    .map(|(id, st)| (Gate::ForPostProcessing, id, st)),
            )
    }

    pub fn gates_on(&self, target: TaskId) -> Vec<Gate> {
        [Gate::ForSetup, Gate::ForPostProcessing]
            .into_iter()
            .filter(|gate| self.gate(*gate).contains_key(&target))
            .collect()
    }
}

/// Result of checking one edge or a whole gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrerequisiteCheck {
    Satisfied,
    Pending,
    Unsatisfiable { target: TaskId, reason: String },
}

impl PrerequisiteCheck {
    /// One edge. `target_status` is `None` when the target no longer exists.
    pub fn edge(target: TaskId, target_status: Option<TaskStatus>, required: TaskStatus) -> Self {
        match target_status {
            None => PrerequisiteCheck::Unsatisfiable {
                target,
                reason: format!("{target} does not exist"),
            },
            Some(status) if status.has_reached(required) => PrerequisiteCheck::Satisfied,
            Some(status) if status.is_dead_end() => PrerequisiteCheck::Unsatisfiable {
                target,
                reason: format!("{target} is '{status}', needed '{required}'"),
            },
            Some(_) => PrerequisiteCheck::Pending,
        }
    }

    /// Fold several edge results: any dead end wins, then any pending edge.
    pub fn combine(checks: impl IntoIterator<Item = PrerequisiteCheck>) -> Self {
        let mut pending = false;
        for check in checks {
            match check {
                PrerequisiteCheck::Unsatisfiable { .. } => return check,
                PrerequisiteCheck::Pending => pending = true,
                PrerequisiteCheck::Satisfied => {}
            }
        }
        if pending {
            PrerequisiteCheck::Pending
        } else {
            PrerequisiteCheck::Satisfied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn add_rejects_failure_statuses_and_self_edges() {
        let owner = TaskId::generate();
        let target = TaskId::generate();
        let mut prereqs = Prerequisites::default();

        assert_eq!(
            prereqs.add(owner, Gate::ForSetup, target, TaskStatus::FailedOnCluster),
            Err(InvalidPrerequisite::UnreachableStatus(TaskStatus::FailedOnCluster))
        );
        assert_eq!(
            prereqs.add(owner, Gate::ForSetup, owner, TaskStatus::Completed),
            Err(InvalidPrerequisite::SelfReference)
        );
        assert!(prereqs.is_empty(Gate::ForSetup));
    }

    #[test]
    fn edges_are_kept_per_gate() {
        let owner = TaskId::generate();
        let a = TaskId::generate();
        let b = TaskId::generate();
        let mut prereqs = Prerequisites::default();
        prereqs.add(owner, Gate::ForSetup, a, TaskStatus::Completed).unwrap();
        prereqs.add(owner, Gate::ForPostProcessing, b, TaskStatus::Completed).unwrap();

        assert_eq!(prereqs.gates_on(a), vec![Gate::ForSetup]);
        assert_eq!(prereqs.gates_on(b), vec![Gate::ForPostProcessing]);
        assert!(prereqs.remove(Gate::ForSetup, a));
        assert!(!prereqs.remove(Gate::ForSetup, a));
        assert_eq!(prereqs.all_edges().count(), 1);
    }

    #[rstest]
    #[case::completed(TaskStatus::Completed, TaskStatus::Completed, PrerequisiteCheck::Satisfied)]
    #[case::configured_by_later(TaskStatus::OnCpu, TaskStatus::Configured, PrerequisiteCheck::Satisfied)]
    #[case::still_running(TaskStatus::OnCpu, TaskStatus::Completed, PrerequisiteCheck::Pending)]
    #[case::recovering(TaskStatus::RecoverCluster, TaskStatus::Completed, PrerequisiteCheck::Pending)]
    fn edge_evaluation(
        #[case] target_status: TaskStatus,
        #[case] required: TaskStatus,
        #[case] expected: PrerequisiteCheck,
    ) {
        let target = TaskId::generate();
        assert_eq!(PrerequisiteCheck::edge(target, Some(target_status), required), expected);
    }

    #[rstest]
    #[case(TaskStatus::FailedOnCluster)]
    #[case(TaskStatus::FailedToSetup)]
    #[case(TaskStatus::Terminated)]
    fn dead_ends_are_unsatisfiable(#[case] target_status: TaskStatus) {
        let target = TaskId::generate();
        let check = PrerequisiteCheck::edge(target, Some(target_status), TaskStatus::Completed);
        assert!(matches!(check, PrerequisiteCheck::Unsatisfiable { target: t, .. } if t == target));
    }

    #[test]
    fn missing_target_is_unsatisfiable() {
        let target = TaskId::generate();
        let check = PrerequisiteCheck::edge(target, None, TaskStatus::Completed);
        assert!(matches!(check, PrerequisiteCheck::Unsatisfiable { .. }));
    }

    #[test]
    fn combine_prefers_dead_ends_then_pending() {
        let t = TaskId::generate();
        let dead = PrerequisiteCheck::Unsatisfiable {
            target: t,
            reason: "x".into(),
        };
        assert_eq!(
            PrerequisiteCheck::combine([PrerequisiteCheck::Pending, dead.clone()]),
            dead
        );
        assert_eq!(
            PrerequisiteCheck::combine([PrerequisiteCheck::Satisfied, PrerequisiteCheck::Pending]),
            PrerequisiteCheck::Pending
        );
        assert_eq!(PrerequisiteCheck::combine([]), PrerequisiteCheck::Satisfied);
    }
}
