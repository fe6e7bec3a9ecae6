//! Driver-facing job model: what gets submitted and what comes back.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque driver token (process id, batch job id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobHandle {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Normalized backend state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Running,
    QueuedActive,
    UserOnHold,
    UserSuspended,
    /// Unknown to the backend, or the backend could not be asked.
    Undetermined,
}

/// Snapshot of every job a backend knows about.
pub type JobStates = HashMap<JobHandle, JobState>;

/// What a driver is asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Human-readable job name.
    pub name: String,

    /// Program and arguments.
    pub command: Vec<String>,

    pub working_dir: PathBuf,

    pub stdout: PathBuf,

    /// `None` with `join_output` sends stderr into `stdout`.
    #[serde(default)]
    pub stderr: Option<PathBuf>,

    #[serde(default)]
    pub join_output: bool,

    #[serde(default)]
    pub queue: Option<String>,

    /// Backend resource limit, never an engine timer.
    #[serde(default, with = "optional_secs")]
    pub walltime: Option<Duration>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            name: name.into(),
            command,
            stdout: working_dir.join("job.stdout"),
            stderr: Some(working_dir.join("job.stderr")),
            working_dir,
            join_output: false,
            queue: None,
            walltime: None,
        }
    }

    pub fn with_output(mut self, stdout: impl Into<PathBuf>, stderr: Option<PathBuf>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.walltime = Some(walltime);
        self
    }

    pub fn joined(mut self) -> Self {
        self.join_output = true;
        self.stderr = None;
        self
    }

    /// Checks shared by every driver. Drivers add their own on top.
    pub fn validate(&self) -> Result<(), String> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err("job command is empty".to_string());
        }
        if self.join_output && self.stderr.is_some() {
            return Err("join_output cannot be combined with an explicit stderr path".to_string());
        }
        if !self.join_output && self.stderr.is_none() {
            return Err("no stderr target and join_output is not set".to_string());
        }
        if self.walltime.is_some_and(|w| w.is_zero()) {
            return Err("walltime must be positive".to_string());
        }
        Ok(())
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// One side of a capacity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    Count(u64),
    Unparsable,
    Exception,
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Count(n) => write!(f, "{n}"),
            Capacity::Unparsable => f.write_str("unparsable"),
            Capacity::Exception => f.write_str("exception"),
        }
    }
}

/// Best-effort queue occupancy, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub tasks_total: Capacity,
    pub tasks_max: Capacity,
}

impl CapacitySnapshot {
    pub fn counts(total: u64, max: u64) -> Self {
        Self {
            tasks_total: Capacity::Count(total),
            tasks_max: Capacity::Count(max),
        }
    }

    pub fn unparsable() -> Self {
        Self {
            tasks_total: Capacity::Unparsable,
            tasks_max: Capacity::Unparsable,
        }
    }

    pub fn exception() -> Self {
        Self {
            tasks_total: Capacity::Exception,
            tasks_max: Capacity::Exception,
        }
    }
}
