use std::fmt::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Map;
use crate::common::error::error;
use crate::exec::TaskId;

/// Extension of completion marker files written by wrapped batch commands.
pub const MARKER_SUFFIX: &str = "done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchBackend {
    Slurm,
    Pbs,
}

impl BatchBackend {
    pub fn submit_program(&self) -> &'static str {
        match self {
            BatchBackend::Slurm => "sbatch",
            BatchBackend::Pbs => "qsub",
        }
    }

    fn directive_prefix(&self) -> &'static str {
        match self {
            BatchBackend::Slurm => "#SBATCH",
            BatchBackend::Pbs => "#PBS",
        }
    }

    /// Environment variable holding the array index inside an array job.
    pub fn array_index_var(&self) -> &'static str {
        match self {
            BatchBackend::Slurm => "SLURM_ARRAY_TASK_ID",
            BatchBackend::Pbs => "PBS_ARRAY_INDEX",
        }
    }

    /// Extracts the scheduler-assigned job id from the submission command's stdout.
    ///
    /// Slurm prints `Submitted batch job <id>`, so the id is the last
    /// whitespace-separated token. PBS prints the job id alone.
    pub fn parse_job_id(&self, stdout: &str) -> crate::Result<String> {
        let id = match self {
            BatchBackend::Slurm => stdout.split_whitespace().next_back(),
            BatchBackend::Pbs => {
                let trimmed = stdout.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
        };
        match id {
            Some(id) => Ok(id.to_string()),
            None => error(format!(
                "Missing job id in {} output\n{stdout}",
                self.submit_program()
            )),
        }
    }
}

/// Builds the dependency expression that delays a job until every job in `job_ids`
/// has reached a terminal state, successful or not.
pub fn build_afterany(job_ids: &[String]) -> String {
    format!("afterany:{}", job_ids.join(","))
}

/// Path of the completion marker of a non-array task.
pub fn marker_path(signal_dir: &Path, task_id: &str) -> PathBuf {
    signal_dir.join(format!("{task_id}.{MARKER_SUFFIX}"))
}

/// Path of the completion marker of one slot of an array task.
pub fn array_marker_path(signal_dir: &Path, task_id: &str, index: usize) -> PathBuf {
    signal_dir.join(format!("{task_id}_{index}.{MARKER_SUFFIX}"))
}

/// Flattens named arguments into `--key=value` flags, in sorted key order so that
/// rendered command lines are deterministic.
pub fn flatten_args(args: &Map<String, String>) -> Vec<String> {
    let mut keys: Vec<_> = args.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| format!("--{key}={}", args[key]))
        .collect()
}

/// Per-slot argument records of an array job, one entry per array index.
#[derive(Debug, Clone)]
pub struct ArrayJob {
    pub per_task_args: Vec<Map<String, String>>,
    /// Concurrency limit declared to the scheduler, if supported.
    pub max_parallel: Option<usize>,
}

impl ArrayJob {
    pub fn count(&self) -> usize {
        self.per_task_args.len()
    }
}

/// All fields rendered into a batch submission script.
///
/// Rendering is pure string construction; writing the script to disk and submitting
/// it is the runner's business.
#[derive(Debug, Clone)]
pub struct ScriptSpec {
    pub task_id: TaskId,
    pub job_name: String,
    pub workdir: PathBuf,
    pub env_activation: Option<String>,
    pub command: String,
    pub args: Map<String, String>,
    pub signal_dir: PathBuf,
    pub log_dir: PathBuf,
    pub submit_args: Vec<String>,
    pub dependency: Option<String>,
    pub array: Option<ArrayJob>,
}

impl ScriptSpec {
    pub fn render(&self, backend: BatchBackend) -> String {
        let prefix = backend.directive_prefix();
        let mut script = String::from("#!/bin/bash\n");

        match backend {
            BatchBackend::Slurm => {
                writeln!(script, "{prefix} --job-name={}", self.job_name).unwrap();
                writeln!(script, "{prefix} --output={}", self.log_path(backend).display())
                    .unwrap();
            }
            BatchBackend::Pbs => {
                writeln!(script, "{prefix} -N {}", self.job_name).unwrap();
                writeln!(script, "{prefix} -o {}", self.log_path(backend).display()).unwrap();
                writeln!(script, "{prefix} -j oe").unwrap();
            }
        }
        if let Some(array) = &self.array {
            self.write_array_directive(&mut script, backend, array);
        }
        if !self.submit_args.is_empty() {
            writeln!(script, "{prefix} {}", self.submit_args.join(" ")).unwrap();
        }
        if let Some(dependency) = &self.dependency {
            match backend {
                BatchBackend::Slurm => {
                    writeln!(script, "{prefix} --depend={dependency}").unwrap()
                }
                BatchBackend::Pbs => writeln!(script, "{prefix} -W depend={dependency}").unwrap(),
            }
        }

        writeln!(script, "\ncd {}", self.workdir.display()).unwrap();
        if let Some(activation) = &self.env_activation {
            writeln!(script, "{activation}").unwrap();
        }
        script.push('\n');

        match &self.array {
            None => {
                writeln!(script, "{}", self.command_line()).unwrap();
                writeln!(
                    script,
                    r#"echo "$?" >> {}"#,
                    marker_path(&self.signal_dir, &self.task_id).display()
                )
                .unwrap();
            }
            Some(array) => {
                let index_var = backend.array_index_var();
                writeln!(script, "case \"${{{index_var}}}\" in").unwrap();
                for (index, task_args) in array.per_task_args.iter().enumerate() {
                    writeln!(script, "{index}) TASK_ARGS=\"{}\" ;;", flatten_args(task_args).join(" "))
                        .unwrap();
                }
                writeln!(script, "esac").unwrap();
                writeln!(script, "{} ${{TASK_ARGS}}", self.command_line()).unwrap();
                writeln!(
                    script,
                    r#"echo "$?" >> {}"#,
                    self.signal_dir
                        .join(format!(
                            "{}_${{{index_var}}}.{MARKER_SUFFIX}",
                            self.task_id
                        ))
                        .display()
                )
                .unwrap();
            }
        }
        script
    }

    /// Completion markers the submitted script is expected to create.
    pub fn expected_markers(&self) -> Vec<PathBuf> {
        match &self.array {
            None => vec![marker_path(&self.signal_dir, &self.task_id)],
            Some(array) => (0..array.count())
                .map(|index| array_marker_path(&self.signal_dir, &self.task_id, index))
                .collect(),
        }
    }

    pub fn script_path(&self, script_dir: &Path) -> PathBuf {
        script_dir.join(format!("{}.sh", self.task_id))
    }

    fn log_path(&self, backend: BatchBackend) -> PathBuf {
        // Slurm expands %a to the array index; PBS appends the index itself.
        let name = match (&self.array, backend) {
            (Some(_), BatchBackend::Slurm) => format!("{}_%a.log", self.task_id),
            _ => format!("{}.log", self.task_id),
        };
        self.log_dir.join(name)
    }

    fn write_array_directive(&self, script: &mut String, backend: BatchBackend, array: &ArrayJob) {
        let prefix = backend.directive_prefix();
        let last = array.count() - 1;
        match backend {
            BatchBackend::Slurm => match array.max_parallel {
                Some(limit) => writeln!(script, "{prefix} --array=0-{last}%{limit}").unwrap(),
                None => writeln!(script, "{prefix} --array=0-{last}").unwrap(),
            },
            // PBS Pro has no per-array throttle directive.
            BatchBackend::Pbs => writeln!(script, "{prefix} -J 0-{last}").unwrap(),
        }
    }

    fn command_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in flatten_args(&self.args) {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}
