//! Local OS process driver.
//!
//! Each job is a detached child leading its own process group; the handle is
//! its pid. Control actions signal the whole group. Hold has no native
//! meaning for a process, so it is a stop plus a note that the job is held.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;

use super::command::{CommandRunner, SystemCommandRunner};
use super::{DriverError, SchedulerDriver};
use crate::domain::{CapacitySnapshot, JobHandle, JobSpec, JobState, JobStates};

#[derive(Default)]
struct Tracked {
    /// Children spawned by this driver and not reaped yet.
    live: HashSet<i32>,
    held: HashSet<i32>,
}

pub struct LocalDriver {
    tracked: Arc<Mutex<Tracked>>,
    runner: Arc<dyn CommandRunner>,
    proc_root: Option<std::path::PathBuf>,
    max_jobs: u64,
}

impl Default for LocalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDriver {
    pub fn new() -> Self {
        let max_jobs = std::thread::available_parallelism().map(|n| n.get() as u64).unwrap_or(1);
        let proc_root = Path::new("/proc/self/stat")
            .exists()
            .then(|| std::path::PathBuf::from("/proc"));
        Self {
            tracked: Arc::new(Mutex::new(Tracked::default())),
            runner: Arc::new(SystemCommandRunner),
            proc_root,
            max_jobs,
        }
    }

    fn tracked(&self) -> std::sync::MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_held(&self, pid: i32) -> bool {
        self.tracked().held.contains(&pid)
    }

    fn pid(handle: &JobHandle) -> Result<i32, DriverError> {
        match handle.as_str().parse::<i32>() {
            Ok(pid) if pid > 1 => Ok(pid),
            _ => Err(DriverError::control(handle, "not a local process handle")),
        }
    }

    fn signal_group(handle: &JobHandle, signal: Signal) -> Result<(), DriverError> {
        let pid = Self::pid(handle)?;
        killpg(Pid::from_raw(pid), signal)
            .map_err(|e| DriverError::control(handle, format!("{signal}: {e}")))?;
        tracing::debug!(driver = "local", %handle, %signal, "signal sent to process group");
        Ok(())
    }

    /// State of one of our own children. Pids this driver did not spawn, or
    /// already reaped, are never reported.
    fn classify(&self, pid: i32, code: char) -> Option<JobState> {
        let tracked = self.tracked();
        if !tracked.live.contains(&pid) {
            return None;
        }
        match code {
            'Z' | 'X' | 'x' => None,
            'T' | 't' if tracked.held.contains(&pid) => Some(JobState::UserOnHold),
            'T' | 't' => Some(JobState::UserSuspended),
            _ => Some(JobState::Running),
        }
    }

    async fn scan_proc(&self, root: &Path) -> Result<JobStates, DriverError> {
        let live: Vec<i32> = self.tracked().live.iter().copied().collect();
        let mut states = JobStates::new();
        for pid in live {
            // The job may exit between the snapshot and the read.
            let Ok(stat) = tokio::fs::read_to_string(root.join(pid.to_string()).join("stat")).await else {
                continue;
            };
            if let Some(state) = parse_proc_stat(&stat).and_then(|code| self.classify(pid, code)) {
                states.insert(JobHandle::new(pid.to_string()), state);
            }
        }
        Ok(states)
    }

    async fn scan_ps(&self) -> Result<JobStates, DriverError> {
        let args = vec!["-A".to_string(), "-o".to_string(), "pid=,stat=".to_string()];
        let out = self
            .runner
            .run("ps", &args, None)
            .await
            .map_err(|e| DriverError::Backend(format!("ps: {e}")))?;
        if !out.success() {
            return Err(DriverError::Backend(format!("ps: {}", out.combined().trim())));
        }
        Ok(parse_ps(&out.stdout)
            .into_iter()
            .filter_map(|(pid, code)| self.classify(pid, code).map(|s| (JobHandle::new(pid.to_string()), s)))
            .collect())
    }
}

#[async_trait]
impl SchedulerDriver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, DriverError> {
        spec.validate().map_err(DriverError::Submission)?;
        if let Some(queue) = &spec.queue {
            return Err(DriverError::Submission(format!("local driver has no queues (got {queue:?})")));
        }
        if spec.walltime.is_some() {
            tracing::debug!(driver = "local", name = %spec.name, "walltime is not enforced for local jobs");
        }

        let stdout = File::create(&spec.stdout)?;
        let stderr = match &spec.stderr {
            Some(path) => File::create(path)?,
            None => stdout.try_clone()?,
        };

        let mut cmd = Command::new(&spec.command[0]);
        cmd.args(&spec.command[1..])
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::Submission(format!("{}: {e}", spec.command[0])))?;
        let pid = child
            .id()
            .ok_or_else(|| DriverError::Submission("child exited before its pid was read".to_string()))?
            as i32;
        self.tracked().live.insert(pid);

        // Reap in the background so the pid leaves the process table on exit.
        let tracked = Arc::clone(&self.tracked);
        tokio::spawn(async move {
            let status = child.wait().await;
            let mut t = tracked.lock().unwrap_or_else(|e| e.into_inner());
            t.live.remove(&pid);
            t.held.remove(&pid);
            tracing::debug!(driver = "local", pid, ?status, "local job exited");
        });

        let handle = JobHandle::new(pid.to_string());
        tracing::info!(driver = "local", %handle, name = %spec.name, "job submitted");
        Ok(handle)
    }

    async fn job_states(&self) -> Result<JobStates, DriverError> {
        match &self.proc_root {
            Some(root) => self.scan_proc(root).await,
            None => self.scan_ps().await,
        }
    }

    async fn query_status(&self, handle: &JobHandle) -> JobState {
        let Ok(pid) = Self::pid(handle) else {
            return JobState::Undetermined;
        };
        if !self.tracked().live.contains(&pid) {
            return JobState::Undetermined;
        }
        match &self.proc_root {
            Some(root) => tokio::fs::read_to_string(root.join(pid.to_string()).join("stat"))
                .await
                .ok()
                .and_then(|stat| parse_proc_stat(&stat))
                .and_then(|code| self.classify(pid, code))
                .unwrap_or(JobState::Undetermined),
            None => self
                .scan_ps()
                .await
                .ok()
                .and_then(|states| states.get(handle).copied())
                .unwrap_or(JobState::Undetermined),
        }
    }

    async fn hold(&self, handle: &JobHandle) -> Result<(), DriverError> {
        Self::signal_group(handle, Signal::SIGSTOP)?;
        self.tracked().held.insert(Self::pid(handle)?);
        Ok(())
    }

    async fn release(&self, handle: &JobHandle) -> Result<(), DriverError> {
        let pid = Self::pid(handle)?;
        if !self.is_held(pid) {
            return Err(DriverError::control(handle, "job is not on hold"));
        }
        Self::signal_group(handle, Signal::SIGCONT)?;
        self.tracked().held.remove(&pid);
        Ok(())
    }

    async fn suspend(&self, handle: &JobHandle) -> Result<(), DriverError> {
        Self::signal_group(handle, Signal::SIGSTOP)
    }

    async fn resume(&self, handle: &JobHandle) -> Result<(), DriverError> {
        Self::signal_group(handle, Signal::SIGCONT)?;
        self.tracked().held.remove(&Self::pid(handle)?);
        Ok(())
    }

    async fn terminate(&self, handle: &JobHandle) -> Result<(), DriverError> {
        let pid = Self::pid(handle)?;
        let group = Pid::from_raw(pid);
        match killpg(group, Signal::SIGTERM) {
            Ok(()) => {
                // A stopped group only sees SIGTERM once continued.
                let _ = killpg(group, Signal::SIGCONT);
                tracing::info!(driver = "local", %handle, "job terminated");
            }
            Err(Errno::ESRCH) => {
                tracing::debug!(driver = "local", %handle, "terminate: job already gone");
            }
            Err(e) => return Err(DriverError::control(handle, format!("SIGTERM: {e}"))),
        }
        self.tracked().held.remove(&pid);
        Ok(())
    }

    async fn capacity_snapshot(&self) -> CapacitySnapshot {
        CapacitySnapshot::counts(self.tracked().live.len() as u64, self.max_jobs)
    }
}

/// State letter of `/proc/<pid>/stat`. The command name may hold spaces
/// and parentheses, so the state is read after the last `)`.
fn parse_proc_stat(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}

/// `ps -A -o pid=,stat=` rows.
fn parse_ps(raw: &str) -> Vec<(i32, char)> {
    raw.lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let pid = cols.next()?.parse::<i32>().ok()?;
            let code = cols.next()?.chars().next()?;
            Some((pid, code))
        })
        .collect()
}
