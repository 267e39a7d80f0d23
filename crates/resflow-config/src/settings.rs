//! Typed settings loaded from `resflow.yaml`.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name recorded on every job this process runs
    pub worker_name: String,

    /// Directory holding `state.json` and the lock file
    pub state_dir: PathBuf,

    pub workflow: WorkflowSettings,

    pub reconcile: ReconcileSettings,

    /// Containers served by this process
    pub containers: Vec<ContainerSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_name: default_worker_name(),
            state_dir: PathBuf::from(".resflow"),
            workflow: WorkflowSettings::default(),
            reconcile: ReconcileSettings::default(),
            containers: Vec::new(),
        }
    }
}

fn default_worker_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "local".to_string())
}

impl Settings {
    /// Parse settings from a YAML string and validate them
    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.workflow.job_poll.validate("workflow.job_poll")?;
        self.workflow.remote_poll.validate("workflow.remote_poll")?;

        let mut seen = HashSet::new();
        for container in &self.containers {
            if !seen.insert(container.id) {
                return Err(ConfigError::Invalid(format!(
                    "container id {} is declared twice",
                    container.id
                )));
            }
            if container.kind.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "container {} has no kind",
                    container.id
                )));
            }
        }
        Ok(())
    }

    /// Path of the state snapshot directory, relative paths resolved against `base`
    pub fn state_dir_in(&self, base: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            base.join(&self.state_dir)
        }
    }
}

/// Workflow engine timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Used while a caller (or a parent step) waits for a job to finish
    pub job_poll: PollSettings,

    /// Used while a step waits for an asynchronous platform-side job
    pub remote_poll: PollSettings,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            job_poll: PollSettings {
                max_attempts: 600,
                initial_delay_ms: 50,
                max_delay_ms: 1000,
                multiplier: 1.5,
            },
            remote_poll: PollSettings {
                max_attempts: 120,
                initial_delay_ms: 500,
                max_delay_ms: 5000,
                multiplier: 2.0,
            },
        }
    }
}

/// Bounded poll loop with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl PollSettings {
    /// Constant interval, no backoff
    pub fn fixed(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: interval_ms,
            max_delay_ms: interval_ms,
            multiplier: 1.0,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        (delay as u64).min(self.max_delay_ms)
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "{field}.max_attempts must be at least 1"
            )));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "{field}.multiplier must be >= 1.0"
            )));
        }
        Ok(())
    }
}

/// What the reconciler does with a local resource whose remote entity vanished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiedPolicy {
    #[default]
    MarkUnknown,
    MarkError,
    Expunge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Seconds between two passes of the reconcile timer
    pub interval_secs: u64,

    pub died_policy: DiedPolicy,

    /// Diff already-known entities against the remote and update on divergence
    pub detect_changes: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            died_policy: DiedPolicy::default(),
            detect_changes: true,
        }
    }
}

/// One remote platform instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    pub id: u64,
    pub name: String,
    /// Platform kind, e.g. "memory"
    pub kind: String,
}
