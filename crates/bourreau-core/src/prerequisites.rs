//! Prerequisite graph for "who waits on whom" questions.
//!
//! Edges live on the dependent task records; this graph is a transient view
//! built from them:
//! - Forward edges: task -> (gate, target, required status)
//! - Reverse edges: target -> (gate, waiting task)
//! - Invariant: edges and reverse_edges are kept in sync

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::{Gate, TaskId, TaskRecord, TaskStatus};
use crate::error::StoreError;
use crate::ports::TaskStore;

#[derive(Debug, Default)]
pub struct PrerequisiteGraph {
    edges: HashMap<TaskId, HashSet<(Gate, TaskId, TaskStatus)>>,
    reverse_edges: HashMap<TaskId, HashSet<(Gate, TaskId)>>,
}

impl PrerequisiteGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of the given records' outgoing edges.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task);
        }
        graph
    }

    /// Graph reachable from `root` by following wait edges through the store.
    /// Targets that no longer exist are kept as leaves.
    pub async fn load_from(store: &dyn TaskStore, root: &TaskRecord) -> Result<Self, StoreError> {
        let mut graph = Self::new();
        let mut seen = HashSet::from([root.id]);
        let mut queue = VecDeque::new();
        graph.add_task(root);
        queue.extend(graph.dependencies(root.id));

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            match store.load(id).await {
                Ok(task) => {
                    graph.add_task(&task);
                    queue.extend(graph.dependencies(id));
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(graph)
    }

    pub fn add_task(&mut self, task: &TaskRecord) {
        for (gate, target, required) in task.prerequisites.all_edges() {
            self.add_edge(task.id, gate, target, required);
        }
    }

    /// `task` waits at `gate` for `target` to reach `required`.
    pub fn add_edge(&mut self, task: TaskId, gate: Gate, target: TaskId, required: TaskStatus) {
        self.edges.entry(task).or_default().insert((gate, target, required));
        self.reverse_edges.entry(target).or_default().insert((gate, task));
    }

    pub fn remove_edge(&mut self, task: TaskId, gate: Gate, target: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().retain(|(g, t, _)| !(*g == gate && *t == target));
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(target) {
            e.get_mut().remove(&(gate, task));
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Tasks waiting on `target`, with the gate they wait at.
    pub fn waiting_on(&self, target: TaskId) -> Vec<(Gate, TaskId)> {
        let mut waiting: Vec<_> = self
            .reverse_edges
            .get(&target)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default();
        waiting.sort_by_key(|(gate, id)| (*id, *gate));
        waiting
    }

    /// Distinct tasks `task` waits for, whatever the gate.
    pub fn dependencies(&self, task: TaskId) -> Vec<TaskId> {
        let mut deps: Vec<TaskId> = self
            .edges
            .get(&task)
            .map(|e| e.iter().map(|(_, target, _)| *target).collect())
            .unwrap_or_default();
        deps.sort();
        deps.dedup();
        deps
    }

    fn edges_at(&self, task: TaskId, gate: Gate) -> impl Iterator<Item = (TaskId, TaskStatus)> + '_ {
        self.edges
            .get(&task)
            .into_iter()
            .flatten()
            .filter(move |(g, _, _)| *g == gate)
            .map(|(_, target, required)| (*target, *required))
    }

    /// A wait chain that leads from `task`, blocked at `gate`, back to
    /// `task` needing to get past that same gate. Such a chain never
    /// resolves. Returns the tasks along it, starting with `task`.
    ///
    /// Edges only block when the target must pass its own gate to reach the
    /// required status: a wrapper waiting for members to be `Configured`
    /// while members wait for the wrapper at post-processing is no deadlock.
    pub fn deadlock_through(&self, task: TaskId, gate: Gate) -> Option<Vec<TaskId>> {
        let start = (task, gate);
        let mut prev: HashMap<(TaskId, Gate), (TaskId, Gate)> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(state @ (node, at)) = queue.pop_front() {
            for (target, required) in self.edges_at(node, at) {
                for next_gate in [Gate::ForSetup, Gate::ForPostProcessing] {
                    if !next_gate.lies_before(required) {
                        continue;
                    }
                    let next = (target, next_gate);
                    if next == start {
                        let mut chain = vec![node];
                        let mut current = state;
                        while let Some(&p) = prev.get(&current) {
                            chain.push(p.0);
                            current = p;
                        }
                        chain.reverse();
                        chain.dedup();
                        return Some(chain);
                    }
                    if !prev.contains_key(&next) {
                        prev.insert(next, state);
                        queue.push_back(next);
                    }
                }
            }
        }
        None
    }
}
