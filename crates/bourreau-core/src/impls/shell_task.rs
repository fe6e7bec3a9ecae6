//! ShellTask: runs a list of shell lines on the cluster and succeeds when
//! they exit with status 0.
//!
//! Params: `commands` (required), `outputs` (work-dir relative files copied
//! into the file cache after a successful run).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HookError;
use crate::lifecycle::{StageContext, TaskKind};

pub const SHELL_TASK_TYPE: &str = "shell";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellParams {
    pub commands: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl ShellParams {
    pub fn new(commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            outputs: Vec::new(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn to_params(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellTask;

#[async_trait]
impl TaskKind for ShellTask {
    fn type_name(&self) -> &'static str {
        SHELL_TASK_TYPE
    }

    async fn setup(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        let params: ShellParams = ctx.params()?;
        if params.commands.iter().all(|line| line.trim().is_empty()) {
            ctx.log("no commands to run");
            return Ok(false);
        }
        if let Some(bad) = params.outputs.iter().find(|name| name.contains("..") || name.starts_with('/')) {
            ctx.log(format!("output {bad} is outside the work directory"));
            return Ok(false);
        }
        tokio::fs::create_dir_all(&ctx.paths.work_dir).await?;
        Ok(true)
    }

    async fn cluster_commands(&self, ctx: &mut StageContext<'_>) -> Result<Vec<String>, HookError> {
        let params: ShellParams = ctx.params()?;
        Ok(params.commands)
    }

    async fn save_results(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        let status = ctx.paths.read_exit_status().await?;
        match status {
            Some(0) => {}
            Some(code) => {
                ctx.log(format!("commands exited with status {code}"));
                return Ok(false);
            }
            None => {
                ctx.log("no exit status recorded");
                return Ok(false);
            }
        }

        let params: ShellParams = ctx.params()?;
        let mut saved = Vec::with_capacity(params.outputs.len());
        for name in &params.outputs {
            let path = ctx.work_file(name);
            let file = ctx.files().cache_copy_from_local_file(&path, name).await?;
            debug!(task_id = %ctx.task.id, file_id = %file.id, name = %name, "output saved");
            saved.push(serde_json::json!({ "id": file.id, "name": file.name }));
        }
        if !saved.is_empty() {
            ctx.log(format!("saved {} output file(s)", saved.len()));
            ctx.task.set_param("saved_outputs", serde_json::Value::Array(saved));
        }
        Ok(true)
    }

    async fn recover_from_cluster_failure(&self, ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        ctx.log("resubmitting after cluster failure");
        Ok(true)
    }

    async fn recover_from_post_processing_failure(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(true)
    }

    async fn restart_at_setup(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(true)
    }

    async fn restart_at_cluster(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(true)
    }

    async fn restart_at_post_processing(&self, _ctx: &mut StageContext<'_>) -> Result<bool, HookError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::TaskStatus;
    use crate::lifecycle::testing::TestEngine;

    fn engine() -> TestEngine {
        TestEngine::new(vec![Arc::new(ShellTask)])
    }

    #[tokio::test]
    async fn empty_commands_fail_setup() {
        let t = engine();
        let task = t
            .add(t.engine.new_task(SHELL_TASK_TYPE, ShellParams::new(["  "]).to_params()))
            .await;
        t.sweep().await;
        assert_eq!(t.status(task.id).await, TaskStatus::FailedToSetup);
    }

    #[tokio::test]
    async fn escaping_output_fails_setup() {
        let t = engine();
        let params = ShellParams::new(["true"]).with_output("../x");
        let task = t.add(t.engine.new_task(SHELL_TASK_TYPE, params.to_params())).await;
        t.sweep().await;
        assert_eq!(t.status(task.id).await, TaskStatus::FailedToSetup);
    }

    #[tokio::test]
    async fn script_carries_the_commands() {
        let t = engine();
        let task = t
            .add(t.engine.new_task(SHELL_TASK_TYPE, ShellParams::new(["echo hi", "date"]).to_params()))
            .await;
        t.sweep().await;
        assert_eq!(t.status(task.id).await, TaskStatus::Queued);

        let mut task = t.load(task.id).await;
        let script_path = t.engine.context(&mut task).paths.script.clone();
        let script = std::fs::read_to_string(script_path).unwrap();
        assert!(script.contains("echo hi\ndate\n"));
    }

    #[tokio::test]
    async fn exit_status_decides_the_outcome() {
        let t = engine();
        let params = ShellParams::new(["true"]).with_output("result.txt");
        let mut task = t.add(t.engine.new_task(SHELL_TASK_TYPE, params.to_params())).await;
        let mut ctx = t.engine.context(&mut task);
        std::fs::create_dir_all(&ctx.paths.work_dir).unwrap();

        assert!(!ShellTask.save_results(&mut ctx).await.unwrap());

        std::fs::write(&ctx.paths.exit_status, "3\n").unwrap();
        assert!(!ShellTask.save_results(&mut ctx).await.unwrap());

        std::fs::write(&ctx.paths.exit_status, "0\n").unwrap();
        std::fs::write(ctx.work_file("result.txt"), "42").unwrap();
        assert!(ShellTask.save_results(&mut ctx).await.unwrap());
        drop(ctx);

        let saved = task.params["saved_outputs"].as_array().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["name"], "result.txt");
        assert!(task.log.iter().any(|entry| entry.message.contains("status 3")));
    }

    #[tokio::test]
    async fn missing_output_is_an_error() {
        let t = engine();
        let params = ShellParams::new(["true"]).with_output("absent.txt");
        let mut task = t.add(t.engine.new_task(SHELL_TASK_TYPE, params.to_params())).await;
        let mut ctx = t.engine.context(&mut task);
        std::fs::create_dir_all(&ctx.paths.work_dir).unwrap();
        std::fs::write(&ctx.paths.exit_status, "0").unwrap();

        assert!(ShellTask.save_results(&mut ctx).await.is_err());
    }
}
