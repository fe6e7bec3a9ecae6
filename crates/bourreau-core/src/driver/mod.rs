//! Scheduler drivers: one adapter per job backend.
//!
//! Every backend reports job state through a different side channel (process
//! tables, `qstat` listings, ...). Drivers normalize it into `JobState` and
//! keep all backend-specific text parsing inside their own module.
//!
//! - `LocalDriver`: detached OS processes, signals on the process group
//! - `PbsDriver` / `SgeDriver`: batch systems through their CLI tools
//! - `InMemoryDriver` (in `impls`): simulated backend for tests and dry runs

pub mod command;
pub mod job_info;
pub mod local;
pub mod pbs;
pub mod sge;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CapacitySnapshot, JobHandle, JobSpec, JobState, JobStates};

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use job_info::JobInfoCache;
pub use local::LocalDriver;
pub use pbs::PbsDriver;
pub use sge::SgeDriver;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The backend rejected the job spec.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// A control command failed at the backend.
    #[error("control of job {handle} failed: {message}")]
    Control { handle: JobHandle, message: String },

    #[error("{driver} does not support {operation}")]
    Unsupported {
        driver: &'static str,
        operation: &'static str,
    },

    /// The backend could not be reached or answered garbage.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn control(handle: &JobHandle, message: impl Into<String>) -> Self {
        DriverError::Control {
            handle: handle.clone(),
            message: message.into(),
        }
    }
}

/// Control actions that map onto driver calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Hold,
    Release,
    Suspend,
    Resume,
    Terminate,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Hold => "hold",
            ControlAction::Release => "release",
            ControlAction::Suspend => "suspend",
            ControlAction::Resume => "resume",
            ControlAction::Terminate => "terminate",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, DriverError>;

    /// One bulk query of every job the backend knows, foreign jobs included.
    async fn job_states(&self) -> Result<JobStates, DriverError>;

    /// Single-job query. Never fails: anything unknown is `Undetermined`.
    async fn query_status(&self, handle: &JobHandle) -> JobState {
        match self.job_states().await {
            Ok(states) => states.get(handle).copied().unwrap_or(JobState::Undetermined),
            Err(e) => {
                tracing::debug!(driver = self.name(), %handle, error = %e, "status query failed");
                JobState::Undetermined
            }
        }
    }

    async fn hold(&self, handle: &JobHandle) -> Result<(), DriverError>;

    async fn release(&self, handle: &JobHandle) -> Result<(), DriverError>;

    async fn suspend(&self, handle: &JobHandle) -> Result<(), DriverError>;

    async fn resume(&self, handle: &JobHandle) -> Result<(), DriverError>;

    /// Idempotent: a job that is already gone is not an error.
    async fn terminate(&self, handle: &JobHandle) -> Result<(), DriverError>;

    /// Best effort, never fails.
    async fn capacity_snapshot(&self) -> CapacitySnapshot;

    async fn control(&self, action: ControlAction, handle: &JobHandle) -> Result<(), DriverError> {
        match action {
            ControlAction::Hold => self.hold(handle).await,
            ControlAction::Release => self.release(handle).await,
            ControlAction::Suspend => self.suspend(handle).await,
            ControlAction::Resume => self.resume(handle).await,
            ControlAction::Terminate => self.terminate(handle).await,
        }
    }
}

/// Render the job as a shell script with backend directive lines on top.
///
/// Shared by the batch drivers, which feed the script to `qsub` on stdin.
pub(crate) fn batch_script(spec: &JobSpec, directives: &[String]) -> String {
    let mut script = String::from("#!/bin/sh\n");
    for directive in directives {
        script.push_str(directive);
        script.push('\n');
    }
    script.push_str(&format!("cd {}\n", shell_quote(&spec.working_dir.to_string_lossy())));
    let argv: Vec<String> = spec.command.iter().map(|a| shell_quote(a)).collect();
    script.push_str(&argv.join(" "));
    script.push('\n');
    script
}

/// Path for an `-o`/`-e` directive. Batch systems split directive lines on
/// whitespace and apply no shell quoting, so such paths are refused.
pub(crate) fn directive_path(path: &Path) -> Result<String, DriverError> {
    let raw = path
        .to_str()
        .ok_or_else(|| DriverError::Submission(format!("output path is not UTF-8: {}", path.display())))?;
    if raw.is_empty() || raw.chars().any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\')) {
        return Err(DriverError::Submission(format!(
            "output path {raw:?} cannot be written into a batch directive"
        )));
    }
    Ok(raw.to_string())
}

/// Single-quote `raw` for `/bin/sh`.
pub fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '=' | ':' | ','))
    {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Batch systems cap job names; keep the tail which carries the id.
pub(crate) fn batch_job_name(name: &str, max: usize) -> String {
    let cleaned: Vec<char> = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let tail = |n: usize| -> String { cleaned[cleaned.len().saturating_sub(n)..].iter().collect() };
    let name = tail(max);
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => name,
        _ => format!("J{}", tail(max.saturating_sub(1))),
    }
}
