//! Sun/Open Grid Engine driver.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use super::command::{CommandOutput, CommandRunner, SystemCommandRunner};
use super::{DriverError, SchedulerDriver, batch_job_name, batch_script, directive_path};
use crate::domain::{Capacity, CapacitySnapshot, JobHandle, JobSpec, JobState, JobStates};

/// `Your job 123 ("name") has been submitted`
static SUBMITTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Your job(?:-array)? (\d+)").expect("static regex"));

/// `job-ID prior name user state ...`
static QSTAT_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+\S+\s+\S+\s+\S+\s+([A-Za-z]+)\s").expect("static regex"));

static FAILURE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)does not exist|invalid|denied|not allowed|error|can't|cannot|unknown").expect("static regex")
});

static ALREADY_GONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)does not exist|already deleted|unknown job").expect("static regex"));

pub struct SgeDriver {
    runner: Arc<dyn CommandRunner>,
    queue: Option<String>,
}

impl SgeDriver {
    pub fn new(queue: Option<String>) -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner), queue)
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>, queue: Option<String>) -> Self {
        Self { runner, queue }
    }

    fn directives(&self, spec: &JobSpec) -> Result<Vec<String>, DriverError> {
        let mut lines = vec![
            "#$ -S /bin/sh".to_string(),
            format!("#$ -N {}", batch_job_name(&spec.name, 64)),
            format!("#$ -o {}", directive_path(&spec.stdout)?),
        ];
        match &spec.stderr {
            Some(stderr) => lines.push(format!("#$ -e {}", directive_path(stderr)?)),
            None => lines.push("#$ -j y".to_string()),
        }
        if let Some(queue) = spec.queue.as_ref().or(self.queue.as_ref()) {
            lines.push(format!("#$ -q {queue}"));
        }
        if let Some(walltime) = spec.walltime {
            lines.push(format!("#$ -l h_rt={}", walltime.as_secs()));
        }
        Ok(lines)
    }

    async fn tool(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<CommandOutput, DriverError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner
            .run(program, &args, stdin)
            .await
            .map_err(|e| DriverError::Backend(format!("{program}: {e}")))
    }

    /// qhold/qrls/qmod exit 0 on some failures; the text tells.
    async fn control_tool(&self, program: &str, args: &[&str], handle: &JobHandle) -> Result<(), DriverError> {
        let mut argv = args.to_vec();
        argv.push(handle.as_str());
        let out = self.tool(program, &argv, None).await?;
        if !out.success() || FAILURE_TEXT.is_match(&out.combined()) {
            return Err(DriverError::control(handle, format!("{program}: {}", out.combined().trim())));
        }
        tracing::debug!(driver = "sge", %handle, program, "control command accepted");
        Ok(())
    }
}

#[async_trait]
impl SchedulerDriver for SgeDriver {
    fn name(&self) -> &'static str {
        "sge"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, DriverError> {
        spec.validate().map_err(DriverError::Submission)?;
        let script = batch_script(spec, &self.directives(spec)?);

        let out = self.tool("qsub", &[], Some(&script)).await?;
        if !out.success() {
            return Err(DriverError::Submission(format!("qsub: {}", out.combined().trim())));
        }
        let handle = SUBMITTED
            .captures(&out.stdout)
            .map(|caps| JobHandle::new(&caps[1]))
            .ok_or_else(|| DriverError::Submission(format!("qsub returned no job id: {:?}", out.stdout)))?;
        tracing::info!(driver = "sge", %handle, name = %spec.name, "job submitted");
        Ok(handle)
    }

    async fn job_states(&self) -> Result<JobStates, DriverError> {
        let out = self.tool("qstat", &["-u", "*"], None).await?;
        if !out.success() {
            return Err(DriverError::Backend(format!("qstat: {}", out.combined().trim())));
        }
        Ok(parse_qstat(&out.stdout))
    }

    async fn hold(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.control_tool("qhold", &[], handle).await
    }

    async fn release(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.control_tool("qrls", &[], handle).await
    }

    async fn suspend(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.control_tool("qmod", &["-sj"], handle).await
    }

    async fn resume(&self, handle: &JobHandle) -> Result<(), DriverError> {
        self.control_tool("qmod", &["-usj"], handle).await
    }

    async fn terminate(&self, handle: &JobHandle) -> Result<(), DriverError> {
        let out = self.tool("qdel", &[handle.as_str()], None).await?;
        let text = out.combined();
        if ALREADY_GONE.is_match(&text) || (out.success() && !FAILURE_TEXT.is_match(&text)) {
            return Ok(());
        }
        Err(DriverError::control(handle, format!("qdel: {}", text.trim())))
    }

    async fn capacity_snapshot(&self) -> CapacitySnapshot {
        match self.tool("qstat", &["-g", "c"], None).await {
            Ok(out) if out.success() => parse_cluster_queues(&out.stdout, self.queue.as_deref()),
            _ => CapacitySnapshot::exception(),
        }
    }
}

/// Map an SGE state code (`r`, `qw`, `hqw`, `Eqw`, `s`, ...) to a `JobState`.
/// Jobs being deleted (`d...`) are treated as gone.
fn job_state(code: &str) -> Option<JobState> {
    if code.contains('d') {
        return None;
    }
    let state = if code.contains('E') || code.contains('h') {
        JobState::UserOnHold
    } else if code.contains('s') || code.contains('S') || code.contains('T') {
        JobState::UserSuspended
    } else if code.contains('r') || code.contains('t') || code.contains('R') {
        JobState::Running
    } else if code.contains('q') || code.contains('w') {
        JobState::QueuedActive
    } else {
        return None;
    };
    Some(state)
}

fn parse_qstat(raw: &str) -> JobStates {
    raw.lines()
        .filter_map(|line| QSTAT_ROW.captures(line))
        .filter_map(|caps| job_state(&caps[2]).map(|state| (JobHandle::new(&caps[1]), state)))
        .collect()
}

/// `qstat -g c`: `USED` and `TOTAL` of one cluster queue, or summed over all.
fn parse_cluster_queues(raw: &str, queue: Option<&str>) -> CapacitySnapshot {
    let mut lines = raw.lines();
    let Some(header) = lines.next() else {
        return CapacitySnapshot::unparsable();
    };
    // "CLUSTER QUEUE" is two header words but one row column.
    let columns: Vec<&str> = header.split_whitespace().skip(1).collect();
    let (Some(used_at), Some(total_at)) = (
        columns.iter().position(|c| *c == "USED"),
        columns.iter().position(|c| *c == "TOTAL"),
    ) else {
        return CapacitySnapshot::unparsable();
    };

    let mut used = Some(0u64);
    let mut total = Some(0u64);
    let mut matched = false;
    for line in lines {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() <= used_at.max(total_at) || cols[0].starts_with('-') {
            continue;
        }
        if queue.is_some_and(|q| q != cols[0]) {
            continue;
        }
        matched = true;
        used = used.zip(cols[used_at].parse::<u64>().ok()).map(|(a, b)| a + b);
        total = total.zip(cols[total_at].parse::<u64>().ok()).map(|(a, b)| a + b);
    }
    if !matched {
        return CapacitySnapshot::unparsable();
    }
    let side = |v: Option<u64>| v.map(Capacity::Count).unwrap_or(Capacity::Unparsable);
    CapacitySnapshot {
        tasks_total: side(used),
        tasks_max: side(total),
    }
}
