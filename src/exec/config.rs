use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Map;
use crate::common::utils::fs::get_current_dir;

/// Configuration of one pipeline run, shared by all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory under which run directories (scripts, signals, logs) are created.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Command executed for each bunch.
    pub process_command: String,
    /// Command executed for the final merge stage.
    pub finalize_command: String,
    /// Arguments passed to both stage commands, rendered as `--key=value`.
    #[serde(default)]
    pub shared_args: Map<String, String>,
    /// Maximum number of concurrently executing tasks. Values below one are
    /// treated as one.
    #[serde(default = "default_concurrency")]
    pub concurrency: i32,
    /// Interval between completion marker polls.
    #[serde(default = "default_poll_interval", with = "duration_format")]
    pub poll_interval: Duration,
    /// Maximum time to wait for completion markers of a single submission.
    #[serde(default = "default_wait_timeout", with = "duration_format")]
    pub wait_timeout: Duration,
    /// Shell preamble prepended to generated scripts, typically an environment
    /// activation command.
    #[serde(default)]
    pub env_activation: Option<String>,
    /// Additional arguments placed into the submission script as scheduler
    /// directives.
    #[serde(default)]
    pub submit_args: Vec<String>,
    /// Keep generated scripts and markers after the run finishes.
    #[serde(default)]
    pub keep_tmp: bool,
}

impl PipelineConfig {
    pub fn new(process_command: impl Into<String>, finalize_command: impl Into<String>) -> Self {
        PipelineConfig {
            workdir: default_workdir(),
            process_command: process_command.into(),
            finalize_command: finalize_command.into(),
            shared_args: Map::new(),
            concurrency: default_concurrency(),
            poll_interval: default_poll_interval(),
            wait_timeout: default_wait_timeout(),
            env_activation: None,
            submit_args: Vec::new(),
            keep_tmp: false,
        }
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1) as usize
    }
}

fn default_workdir() -> PathBuf {
    get_current_dir()
}

fn default_concurrency() -> i32 {
    1
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_wait_timeout() -> Duration {
    // Effectively "very long"; batch queues can hold jobs for days.
    Duration::from_secs(4 * 24 * 3600)
}

/// Serde adapter accepting durations in humantime format (`2h`, `30s`, ...).
mod duration_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}

/// Scratch directory layout of a single pipeline run.
///
/// Each run gets a fresh numbered directory so that reruns never collide:
/// `<workdir>/run/<NNN>/{scripts,signals,logs}`.
#[derive(Debug, Clone)]
pub struct RunDirs {
    root: PathBuf,
}

impl RunDirs {
    pub fn create(workdir: &Path) -> crate::Result<RunDirs> {
        let base = workdir.join("run");
        std::fs::create_dir_all(&base)?;

        for run_num in 0..1000u32 {
            let root = base.join(format!("{run_num:03}"));
            match std::fs::create_dir(&root) {
                Ok(()) => {
                    let dirs = RunDirs { root };
                    std::fs::create_dir(dirs.scripts())?;
                    std::fs::create_dir(dirs.signals())?;
                    std::fs::create_dir(dirs.logs())?;
                    return Ok(dirs);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        crate::common::error::error(format!(
            "Too many run directories in {}",
            base.display()
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scripts(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn signals(&self) -> PathBuf {
        self.root.join("signals")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }
}
