//! PBS/Torque driver.
//!
//! Handles are the numeric part of the job id (`123` for `123.server`):
//! `qstat` truncates long server names, the number never changes.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::command::{CommandOutput, CommandRunner, SystemCommandRunner};
use super::{DriverError, SchedulerDriver, batch_job_name, batch_script, directive_path};
use crate::domain::{CapacitySnapshot, Capacity, JobHandle, JobSpec, JobState, JobStates};

static JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\[\d*\])?)(?:\.\S*)?\s*$").expect("static regex"));

static QSTAT_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\[\d*\])?)(?:\.\S*)?\s+\S+\s+\S+\s+\S+\s+([A-Z])\s+\S+").expect("static regex")
});

static FAILURE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unknown job|illegal|invalid|not allowed|denied|error|cannot").expect("static regex")
});

/// Text `qdel` prints for jobs that are already gone.
static ALREADY_GONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unknown job|job has finished|invalid state for job - COMPLETE").expect("static regex")
});

pub struct PbsDriver {
    runner: Arc<dyn CommandRunner>,
    queue: Option<String>,
}

impl PbsDriver {
    pub fn new(queue: Option<String>) -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner), queue)
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>, queue: Option<String>) -> Self {
        Self { runner, queue }
    }

    fn directives(&self, spec: &JobSpec) -> Result<Vec<String>, DriverError> {
        let mut lines = vec![
            format!("#PBS -N {}", batch_job_name(&spec.name, 15)),
            format!("#PBS -o {}", directive_path(&spec.stdout)?),
        ];
        match &spec.stderr {
            Some(stderr) => lines.push(format!("#PBS -e {}", directive_path(stderr)?)),
            None => lines.push("#PBS -j oe".to_string()),
        }
        if let Some(queue) = spec.queue.as_ref().or(self.queue.as_ref()) {
            lines.push(format!("#PBS -q {queue}"));
        }
        if let Some(walltime) = spec.walltime {
            lines.push(format!("#PBS -l walltime={}", hms(walltime)));
        }
        Ok(lines)
    }

    async fn tool(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput, DriverError> {
        self.runner
            .run(program, args, stdin)
            .await
            .map_err(|e| DriverError::Backend(format!("{program}: {e}")))
    }

    async fn control_tool(&self, program: &str, handle: &JobHandle) -> Result<(), DriverError> {
        let out = self.tool(program, &[handle.to_string()], None).await?;
        if !out.success() || FAILURE_TEXT.is_match(&out.combined()) {
            return Err(DriverError::control(handle, format!("{program}: {}", out.combined().trim())));
        }
        tracing::debug!(driver = "pbs", %handle, program, "control command accepted");
        Ok(())
    }
}

#[async_trait]
impl SchedulerDriver for PbsDriver {
    fn name(&self) -> &'static str {
        "pbs"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, DriverError> {
        spec.validate().map_err(DriverError::Submission)?;
        let script = batch_script(spec, &self.directives(spec)?);

        let out = self.tool("qsub", &[], Some(&script)).await?;
        if !out.success() {
            return Err(DriverError::Submission(format!("qsub: {}", out.combined().trim())));
        }
        let handle = parse_job_id(&out.stdout)
            .ok_or_else(|| DriverError::Submission(format!("qsub returned no job id: {:?}", out.stdout)))?;
        tracing::info!(driver = "pbs", %handle, name = %spec.name, "job submitted");
        Ok(handle)
    }

    async fn job_states(&self) -> Result<JobStates, DriverError> {
        let out = self.tool("qstat", &[], None).await?;
        if !out.success() {
            return Err(DriverError::Backend(format!("qstat: {}", out.combined().trim())));
        }
        Ok(parse_qstat(&out.stdout))
    }

    async fn query_status(&self, handle: &JobHandle) -> JobState {
        match self.tool("qstat", &[handle.to_string()], None).await {
            Ok(out) if out.success() => parse_qstat(&out.stdout)
                .get(handle)
                .copied()
                .unwrap_or(JobState::Undetermined),
            _ => JobState::Undetermined,
        }
    }

    async fn hold(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.control_tool("qhold", handle).await
    }

    async fn release(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.control_tool("qrls", handle).await
    }

    async fn suspend(&self, _handle: &JobHandle) -> Result<(), DriverError> {
        Err(DriverError::Unsupported {
            driver: "pbs",
            operation: "suspend",
        })
    }

    async fn resume(&self, _handle: &JobHandle) -> Result<(), DriverError> {
        Err(DriverError::Unsupported {
            driver: "pbs",
            operation: "resume",
        })
    }

    async fn terminate(&self, handle: &JobHandle) -> Result<(), DriverError> {
        let out = self.tool("qdel", &[handle.to_string()], None).await?;
        let text = out.combined();
        if out.success() || ALREADY_GONE.is_match(&text) {
            return Ok(());
        }
        Err(DriverError::control(handle, format!("qdel: {}", text.trim())))
    }

    async fn capacity_snapshot(&self) -> CapacitySnapshot {
        let mut args = vec!["-Q".to_string()];
        if let Some(queue) = &self.queue {
            args.push(queue.clone());
        }
        match self.tool("qstat", &args, None).await {
            Ok(out) if out.success() => parse_queue_capacity(&out.stdout, self.queue.as_deref()),
            _ => CapacitySnapshot::exception(),
        }
    }
}

/// `123.server` → `123`.
fn parse_job_id(raw: &str) -> Option<JobHandle> {
    raw.lines()
        .find_map(|line| JOB_ID.captures(line))
        .map(|caps| JobHandle::new(&caps[1]))
}

/// Default `qstat` listing. Completed (`C`) jobs are left out.
fn parse_qstat(raw: &str) -> JobStates {
    raw.lines()
        .filter_map(|line| QSTAT_ROW.captures(line))
        .filter_map(|caps| {
            let state = match &caps[2] {
                "R" | "E" => JobState::Running,
                "Q" | "W" | "T" => JobState::QueuedActive,
                "H" => JobState::UserOnHold,
                "S" => JobState::UserSuspended,
                _ => return None,
            };
            Some((JobHandle::new(&caps[1]), state))
        })
        .collect()
}

/// `qstat -Q`: `Max` and `Tot` columns of the queue row.
fn parse_queue_capacity(raw: &str, queue: Option<&str>) -> CapacitySnapshot {
    let rows: Vec<Vec<&str>> = raw
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .filter(|cols| cols.len() >= 3 && cols[0] != "Queue" && !cols[0].starts_with('-'))
        .collect();
    let row = match queue {
        Some(q) => rows.iter().find(|cols| cols[0] == q),
        None => rows.first(),
    };
    let Some(row) = row else {
        return CapacitySnapshot::unparsable();
    };
    let count = |raw: &str| raw.parse::<u64>().map(Capacity::Count).unwrap_or(Capacity::Unparsable);
    CapacitySnapshot {
        tasks_total: count(row[2]),
        tasks_max: count(row[1]),
    }
}

fn hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
