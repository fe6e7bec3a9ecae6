//! Task groups: N member tasks run inside one cluster job.
//!
//! Members are created with `configure_only`, so they stop at `Configured`
//! with their script written. A `parallelizer` wrapper waits (setup gate) for
//! every member to be configured, runs all member scripts side by side in one
//! job, and on completion hands each member to its own post-processing:
//!
//! ```text
//! member --(for_post_processing: wrapper Completed)--> wrapper
//! wrapper --(for_setup: member Configured)--> member
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{Gate, TaskId, TaskRecord, TaskStatus};
use crate::driver::{ControlAction, shell_quote};
use crate::error::{EngineError, HookError};
use crate::lifecycle::{Engine, StageContext, TaskKind};

pub const PARALLELIZER_TYPE: &str = "parallelizer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub task_id: TaskId,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

/// Params of a wrapper task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupParams {
    pub members: Vec<GroupMember>,
}

impl GroupParams {
    pub fn enabled_members(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.members.iter().filter(|m| m.enabled).map(|m| m.task_id)
    }
}

/// Outcome of `launch_group`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    pub wrappers: Vec<TaskId>,
    /// Tasks launched on their own.
    pub independent: Vec<TaskId>,
    /// Tasks running inside a wrapper.
    pub covered: usize,
}

/// Split `items` into consecutive batches of at most `group_size`.
pub fn partition<T>(items: Vec<T>, group_size: usize) -> Vec<Vec<T>> {
    let size = group_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Create `tasks`, wrapping batches of `group_size` into parallelizer tasks.
/// Batches of one task, or any `group_size` below 2, launch normally.
pub async fn launch_group(
    engine: &Engine,
    tasks: Vec<TaskRecord>,
    group_size: usize,
) -> Result<LaunchReport, EngineError> {
    let mut report = LaunchReport::default();
    for batch in partition(tasks, group_size) {
        if group_size < 2 || batch.len() < 2 {
            for task in batch {
                let created = engine.create_task(task).await?;
                report.independent.push(created.id);
            }
            continue;
        }
        if engine.registry().get(PARALLELIZER_TYPE).is_none() {
            return Err(EngineError::UnknownTaskType(PARALLELIZER_TYPE.to_string()));
        }

        let params = GroupParams {
            members: batch
                .iter()
                .map(|task| GroupMember {
                    task_id: task.id,
                    enabled: true,
                })
                .collect(),
        };
        let mut wrapper = engine.new_task(PARALLELIZER_TYPE, to_params(&params)?);
        wrapper.batch_id = batch[0].batch_id;
        wrapper.level = batch.iter().map(|t| t.level).max().unwrap_or_default();

        let size = batch.len();
        for mut member in batch {
            member.configure_only = true;
            member.add_prerequisite(Gate::ForPostProcessing, wrapper.id, TaskStatus::Completed)?;
            wrapper.add_prerequisite(Gate::ForSetup, member.id, TaskStatus::Configured)?;
            engine.create_task(member).await?;
        }
        let wrapper = engine.create_task(wrapper).await?;
        info!(task_id = %wrapper.id, members = size, "task group launched");
        report.wrappers.push(wrapper.id);
        report.covered += size;
    }
    Ok(report)
}

fn to_params(params: &GroupParams) -> Result<serde_json::Map<String, serde_json::Value>, EngineError> {
    match serde_json::to_value(params) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(EngineError::InvalidRequest(format!("group params are not an object: {other}"))),
        Err(e) => Err(EngineError::Hook(e.into())),
    }
}

/// The wrapper task kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct Parallelizer;

impl Parallelizer {
    async fn members(ctx: &StageContext<'_>) -> Result<Vec<TaskRecord>, HookError> {
        let params: GroupParams = ctx.params()?;
        let mut members = Vec::new();
        for id in params.enabled_members() {
            members.push(ctx.store().load(id).await?);
        }
        Ok(members)
    }

    /// Restart every member at setup, gated on this wrapper again. Each
    /// member kind is asked first on a copy; nothing is saved unless all of
    /// them accept.
    async fn restart_members_at_setup(ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        let wrapper = ctx.task.id;
        let mut members = Self::members(ctx).await?;
        for member in &mut members {
            if !member.status.can_transition_to(TaskStatus::RestartSetup) {
                ctx.log(format!("restart refused: member {} is '{}'", member.id, member.status));
                return Ok(false);
            }
            let Some(kind) = ctx.kind_of(member) else {
                ctx.log(format!("restart refused: member {} has unknown type '{}'", member.id, member.task_type));
                return Ok(false);
            };
            let accepted = {
                let mut member_ctx = ctx.context_for(member);
                kind.restart_at_setup(&mut member_ctx).await?
            };
            if !accepted {
                ctx.log(format!("restart refused: member {} declined", member.id));
                return Ok(false);
            }
        }

        for mut member in members {
            let now = ctx.now();
            member
                .enter_meta_state(TaskStatus::RestartSetup, now)
                .map_err(|e| HookError::msg(e.to_string()))?;
            member.begin_new_run(now);
            member
                .transition(TaskStatus::New, now)
                .map_err(|e| HookError::msg(e.to_string()))?;
            member.configure_only = true;
            member
                .add_prerequisite(Gate::ForPostProcessing, wrapper, TaskStatus::Completed)
                .map_err(|e| HookError::msg(e.to_string()))?;
            member.add_log(format!("restarting at setup with group {wrapper}"), now);
            ctx.store().save(&member).await?;
            ctx.task
                .add_prerequisite(Gate::ForSetup, member.id, TaskStatus::Configured)
                .map_err(|e| HookError::msg(e.to_string()))?;
        }
        Ok(true)
    }

    /// Send every member into `meta`; their own kinds resolve it.
    async fn send_members_to(ctx: &mut StageContext<'_>, meta: TaskStatus) -> Result<(), HookError> {
        let wrapper = ctx.task.id;
        for member in Self::members(ctx).await? {
            ctx.update_task(member.id, |m, now| {
                m.enter_meta_state(meta, now)
                    .map_err(|e| HookError::msg(e.to_string()))?;
                m.add_log(format!("{meta} requested by group {wrapper}"), now);
                Ok(true)
            })
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskKind for Parallelizer {
    fn type_name(&self) -> &'static str {
        PARALLELIZER_TYPE
    }

    async fn setup(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        for member in Self::members(ctx).await? {
            if member.status != TaskStatus::Configured {
                ctx.log(format!("member {} is '{}', not configured", member.id, member.status));
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn cluster_commands(&self, ctx: &mut StageContext<'_>) -> Result<Vec<String>, HookError> {
        let members = Self::members(ctx).await?;
        let mut lines = vec![r#"trap 'echo "bourreau: a member finished"' CHLD"#.to_string()];
        for (n, member) in members.iter().enumerate() {
            let paths = ctx.paths_for(member);
            lines.push(format!(
                "sh {} > {} 2> {} &",
                shell_quote(&paths.script.to_string_lossy()),
                shell_quote(&paths.stdout.to_string_lossy()),
                shell_quote(&paths.stderr.to_string_lossy()),
            ));
            lines.push(format!("pid_{n}=$!"));
        }
        for (n, member) in members.iter().enumerate() {
            lines.push(format!("wait $pid_{n}"));
            lines.push(format!("echo \"{} exit status $?\"", member.id));
        }
        lines.push("wait".to_string());
        Ok(lines)
    }

    async fn save_results(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        let wrapper = ctx.task.id;
        let mut handed_over = 0;
        for member in Self::members(ctx).await? {
            let mut moved = false;
            ctx.update_task(member.id, |m, now| {
                if m.status != TaskStatus::Configured {
                    return Ok(false);
                }
                m.remove_prerequisite(Gate::ForPostProcessing, wrapper);
                m.transition(TaskStatus::DataReady, now)
                    .map_err(|e| HookError::msg(e.to_string()))?;
                m.add_log(format!("data ready after group {wrapper}"), now);
                moved = true;
                Ok(true)
            })
            .await?;
            if moved {
                handed_over += 1;
            } else {
                debug!(task_id = %member.id, status = %member.status, "member not handed over");
            }
        }
        ctx.log(format!("{handed_over} member(s) handed to post processing"));
        Ok(true)
    }

    async fn recover_from_setup_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(true)
    }

    async fn restart_at_setup(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        let members = Self::members(ctx).await?;
        let finished = members
            .iter()
            .all(|m| m.status == TaskStatus::Completed || m.status == TaskStatus::Terminated || m.status.is_failure());
        if !finished {
            ctx.log("restart refused: some members are still active");
            return Ok(false);
        }
        Self::restart_members_at_setup(ctx).await
    }

    async fn restart_at_cluster(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        ctx.log("a task group cannot be restarted at the cluster stage");
        Ok(false)
    }

    async fn restart_at_post_processing(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        let members = Self::members(ctx).await?;
        if !members.iter().all(|m| m.status == TaskStatus::Completed) {
            ctx.log("restart refused: not every member completed");
            return Ok(false);
        }
        Self::send_members_to(ctx, TaskStatus::RestartPostProcess).await?;
        Ok(true)
    }

    async fn after_control(&self, ctx: &mut StageContext<'_>, action: ControlAction) -> Result<(), HookError> {
        if action != ControlAction::Terminate {
            return Ok(());
        }
        let wrapper = ctx.task.id;
        for member in Self::members(ctx).await? {
            let note = format!("terminated with group {wrapper}");
            ctx.move_task(member.id, TaskStatus::Configured, TaskStatus::Terminated, &note)
                .await?;
        }
        Ok(())
    }
}
