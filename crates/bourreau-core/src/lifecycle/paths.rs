//! On-disk layout of one task run.
//!
//! `<work_root>/<task_type>-<ulid>/` holds, per `run_number`:
//! `bourreau-<run>.sh`, `.bourreau-<run>.out`, `.bourreau-<run>.err` and
//! `.bourreau-<run>.status` (exit status written by the script itself).

use std::path::{Path, PathBuf};

use crate::domain::TaskRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPaths {
    pub work_dir: PathBuf,
    pub script: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub exit_status: PathBuf,
}

impl TaskPaths {
    pub fn new(work_root: &Path, task: &TaskRecord) -> Self {
        Self::for_run(work_root, task, task.run_number)
    }

    pub fn for_run(work_root: &Path, task: &TaskRecord, run: u32) -> Self {
        let work_dir = work_root.join(format!("{}-{}", task.task_type, task.id.as_ulid()));
        Self {
            script: work_dir.join(format!("bourreau-{run}.sh")),
            stdout: work_dir.join(format!(".bourreau-{run}.out")),
            stderr: work_dir.join(format!(".bourreau-{run}.err")),
            exit_status: work_dir.join(format!(".bourreau-{run}.status")),
            work_dir,
        }
    }

    /// Exit status the script recorded, `None` if it never got that far.
    pub async fn read_exit_status(&self) -> std::io::Result<Option<i32>> {
        match tokio::fs::read_to_string(&self.exit_status).await {
            Ok(raw) => Ok(raw.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Copy the outputs of another run into this one's slots. Missing files
    /// are skipped.
    pub async fn carry_outputs_from(&self, previous: &TaskPaths) -> std::io::Result<()> {
        for (from, to) in [
            (&previous.stdout, &self.stdout),
            (&previous.stderr, &self.stderr),
            (&previous.exit_status, &self.exit_status),
        ] {
            match tokio::fs::copy(from, to).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Wrap stage commands into a script that records its own exit status.
pub fn render_script(task: &TaskRecord, paths: &TaskPaths, commands: &[String]) -> String {
    use crate::driver::shell_quote;

    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!(
        "# {} run {} ({})\n",
        task.id, task.run_number, task.task_type
    ));
    script.push_str(&format!(
        "cd {} || exit 1\n",
        shell_quote(&paths.work_dir.to_string_lossy())
    ));
    script.push_str("(\n");
    for line in commands {
        script.push_str(line);
        script.push('\n');
    }
    script.push_str(")\n");
    script.push_str("status=$?\n");
    script.push_str(&format!(
        "echo $status > {}\n",
        shell_quote(&paths.exit_status.to_string_lossy())
    ));
    script.push_str("exit $status\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use chrono::Utc;

    fn task() -> TaskRecord {
        TaskRecord::new(TaskId::generate(), "shell", "n1", Default::default(), Utc::now())
    }

    #[test]
    fn paths_follow_run_number() {
        let mut t = task();
        let first = TaskPaths::new(Path::new("/work"), &t);
        t.run_number = 2;
        let third = TaskPaths::new(Path::new("/work"), &t);

        assert_eq!(first.work_dir, third.work_dir);
        assert!(first.script.ends_with("bourreau-0.sh"));
        assert!(third.stdout.ends_with(".bourreau-2.out"));
    }

    #[tokio::test]
    async fn exit_status_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(dir.path(), &task());
        assert_eq!(paths.read_exit_status().await.unwrap(), None);

        std::fs::create_dir_all(&paths.work_dir).unwrap();
        std::fs::write(&paths.exit_status, "3\n").unwrap();
        assert_eq!(paths.read_exit_status().await.unwrap(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rendered_script_records_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let t = task();
        let paths = TaskPaths::new(dir.path(), &t);
        std::fs::create_dir_all(&paths.work_dir).unwrap();
        let script = render_script(&t, &paths, &["echo hi".to_string(), "exit 4".to_string()]);
        std::fs::write(&paths.script, script).unwrap();

        let status = std::process::Command::new("sh").arg(&paths.script).status().unwrap();
        assert_eq!(status.code(), Some(4));
        assert_eq!(paths.read_exit_status().await.unwrap(), Some(4));
    }
}
