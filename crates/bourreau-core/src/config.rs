//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! `BOURREAU_ID` and `BOURREAU_WORK_ROOT` override the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::{LocalDriver, PbsDriver, SchedulerDriver, SgeDriver};
use crate::lifecycle::EngineSettings;

pub const ENV_BOURREAU_ID: &str = "BOURREAU_ID";
pub const ENV_WORK_ROOT: &str = "BOURREAU_WORK_ROOT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Scheduler backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverConfig {
    #[default]
    Local,
    Pbs {
        #[serde(default)]
        queue: Option<String>,
    },
    Sge {
        #[serde(default)]
        queue: Option<String>,
    },
}

impl DriverConfig {
    pub fn build(&self) -> Arc<dyn SchedulerDriver> {
        match self {
            DriverConfig::Local => Arc::new(LocalDriver::new()),
            DriverConfig::Pbs { queue } => Arc::new(PbsDriver::new(queue.clone())),
            DriverConfig::Sge { queue } => Arc::new(SgeDriver::new(queue.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bourreau_id: String,
    pub work_root: PathBuf,
    /// Defaults to `<work_root>/.cache`.
    pub file_cache_root: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub max_parallel_advances: usize,
    pub submission_grace_secs: u64,
    pub cascade_prerequisite_failures: bool,
    pub default_queue: Option<String>,
    pub default_walltime_secs: Option<u64>,
    pub driver: DriverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bourreau_id: "local".to_string(),
            work_root: std::env::temp_dir().join("bourreau"),
            file_cache_root: None,
            poll_interval_ms: 5_000,
            max_parallel_advances: 8,
            submission_grace_secs: 30,
            cascade_prerequisite_failures: true,
            default_queue: None,
            default_walltime_secs: None,
            driver: DriverConfig::Local,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// File (or defaults when `path` is `None`), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&raw, path)?
            }
            None => {
                tracing::debug!("no config file given, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup(ENV_BOURREAU_ID).filter(|v| !v.trim().is_empty()) {
            self.bourreau_id = id;
        }
        if let Some(root) = lookup(ENV_WORK_ROOT).filter(|v| !v.trim().is_empty()) {
            self.work_root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bourreau_id.trim().is_empty() {
            return Err(ConfigError::Invalid("bourreau_id is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".to_string()));
        }
        if self.max_parallel_advances == 0 {
            return Err(ConfigError::Invalid("max_parallel_advances must be positive".to_string()));
        }
        if self.default_walltime_secs == Some(0) {
            return Err(ConfigError::Invalid("default_walltime_secs must be positive".to_string()));
        }
        if self.driver == DriverConfig::Local && self.default_queue.is_some() {
            return Err(ConfigError::Invalid("the local driver has no queues".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn file_cache_root(&self) -> PathBuf {
        self.file_cache_root
            .clone()
            .unwrap_or_else(|| self.work_root.join(".cache"))
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            bourreau_id: self.bourreau_id.clone(),
            work_root: self.work_root.clone(),
            submission_grace: Duration::from_secs(self.submission_grace_secs),
            cascade_prerequisite_failures: self.cascade_prerequisite_failures,
            default_queue: self.default_queue.clone(),
            default_walltime: self.default_walltime_secs.map(Duration::from_secs),
        }
    }
}
