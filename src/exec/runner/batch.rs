use std::path::Path;
use std::process::Output;
use std::sync::Arc;

use anyhow::Context;
use bstr::ByteSlice;
use tokio::process::Command;

use crate::Map;
use crate::common::error::ZdError;
use crate::common::utils::fs::absolute_path;
use crate::exec::config::{PipelineConfig, RunDirs};
use crate::exec::make_task_id;
use crate::exec::runner::{Runner, RunnerFuture, TaskStatus, transpose_parallel_args};
use crate::exec::script::{ArrayJob, BatchBackend, ScriptSpec};
use crate::exec::semaphore::wait_for_markers;
use crate::exec::tempset::TempResourceSet;

pub(crate) fn create_command(arguments: Vec<&str>, workdir: &Path) -> Command {
    let mut command = Command::new(arguments[0]);
    command.args(&arguments[1..]);
    command.current_dir(workdir);
    command
}

pub(crate) fn check_command_output(output: Output) -> crate::Result<Output> {
    let status = output.status;
    if !status.success() {
        return Err(ZdError::SubmissionFailed(format!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        )));
    }
    Ok(output)
}

/// Writes the rendered script of `spec` into the run directory, submits it through
/// `program` and returns the job id parsed from the submission output.
///
/// The script, a `<task_id>.jobid` debug file and the expected completion markers
/// are registered with `tmp` for cleanup. A submission command that cannot be
/// spawned or exits non-zero is fatal; nothing is retried.
pub(crate) async fn submit_script(
    spec: &ScriptSpec,
    backend: BatchBackend,
    program: &str,
    dirs: &RunDirs,
    tmp: &TempResourceSet,
) -> crate::Result<String> {
    let script_dir = dirs.scripts();
    let script_path = spec.script_path(&script_dir);
    std::fs::write(&script_path, spec.render(backend))
        .with_context(|| format!("Cannot write script into {}", script_path.display()))?;
    tmp.add_file(&script_path);
    tmp.add_files(spec.expected_markers());

    let script_path_str = script_path.to_str().ok_or_else(|| {
        ZdError::GenericError(format!("Non-UTF-8 script path {}", script_path.display()))
    })?;
    let arguments = vec![program, script_path_str];
    log::debug!("Running command `{}`", arguments.join(" "));
    let mut command = create_command(arguments, dirs.root());

    let output = command
        .output()
        .await
        .map_err(|e| ZdError::SubmissionFailed(format!("{program} start failed: {e}")))?;
    let output = check_command_output(output)?;
    let stdout = output
        .stdout
        .to_str()
        .map_err(|e| ZdError::GenericError(format!("Invalid UTF-8 in {program} output: {e:?}")))?
        .trim();
    log::debug!("{program} output: {stdout}");

    let job_id = backend.parse_job_id(stdout)?;

    // Keep the job id next to the script as debug information for operators.
    let jobid_path = script_dir.join(format!("{}.jobid", spec.task_id));
    std::fs::write(&jobid_path, &job_id)?;
    tmp.add_file(jobid_path);

    Ok(job_id)
}

/// Executes tasks by submitting them to an external batch scheduler and waiting for
/// filesystem completion markers.
pub struct BatchQueueRunner {
    backend: BatchBackend,
    submit_program: String,
    config: PipelineConfig,
    dirs: RunDirs,
    tmp: Arc<TempResourceSet>,
}

impl BatchQueueRunner {
    pub fn new(
        backend: BatchBackend,
        config: PipelineConfig,
        dirs: RunDirs,
        tmp: Arc<TempResourceSet>,
    ) -> BatchQueueRunner {
        BatchQueueRunner {
            backend,
            submit_program: backend.submit_program().to_string(),
            config,
            dirs,
            tmp,
        }
    }

    /// Overrides the submission executable, e.g. with an absolute path to `sbatch`.
    pub fn with_submit_program(mut self, program: impl Into<String>) -> BatchQueueRunner {
        self.submit_program = program.into();
        self
    }

    fn script_spec(&self, command: &str, args: &Map<String, String>) -> ScriptSpec {
        let task_id = make_task_id(command);
        ScriptSpec {
            job_name: task_id.clone(),
            task_id,
            workdir: absolute_path(self.config.workdir.clone()),
            env_activation: self.config.env_activation.clone(),
            command: command.to_string(),
            args: args.clone(),
            signal_dir: self.dirs.signals(),
            log_dir: self.dirs.logs(),
            submit_args: self.config.submit_args.clone(),
            dependency: None,
            array: None,
        }
    }
}

impl Runner for BatchQueueRunner {
    fn single<'a>(
        &'a mut self,
        command: &'a str,
        args: &'a Map<String, String>,
    ) -> RunnerFuture<'a, ()> {
        Box::pin(async move {
            let spec = self.script_spec(command, args);
            submit_script(
                &spec,
                self.backend,
                &self.submit_program,
                &self.dirs,
                &self.tmp,
            )
            .await?;
            wait_for_markers(
                spec.expected_markers(),
                self.config.wait_timeout,
                self.config.poll_interval,
            )
            .await
        })
    }

    fn parallel<'a>(
        &'a mut self,
        command: &'a str,
        parallel_args: &'a Map<String, Vec<String>>,
        args: &'a Map<String, String>,
    ) -> RunnerFuture<'a, Vec<TaskStatus>> {
        Box::pin(async move {
            let records = transpose_parallel_args(parallel_args)?;
            let count = records.len();
            if count == 0 {
                return Ok(Vec::new());
            }

            let mut spec = self.script_spec(command, args);
            spec.array = Some(ArrayJob {
                per_task_args: records,
                max_parallel: Some(self.config.effective_concurrency()),
            });
            submit_script(
                &spec,
                self.backend,
                &self.submit_program,
                &self.dirs,
                &self.tmp,
            )
            .await?;
            wait_for_markers(
                spec.expected_markers(),
                self.config.wait_timeout,
                self.config.poll_interval,
            )
            .await?;
            Ok(vec![TaskStatus::Signalled; count])
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use super::BatchQueueRunner;
    use crate::Map;
    use crate::common::error::ZdError;
    use crate::exec::config::{PipelineConfig, RunDirs};
    use crate::exec::runner::{Runner, TaskStatus};
    use crate::exec::script::BatchBackend;
    use crate::exec::tempset::TempResourceSet;

    /// Fake `sbatch` that runs the submitted script synchronously (once per array
    /// slot for array jobs), so completion markers exist by the time the submission
    /// returns.
    const FAKE_SBATCH: &str = r#"#!/bin/bash
range=$(sed -n 's/^#SBATCH --array=0-\([0-9][0-9]*\).*$/\1/p' "$1")
if [ -n "$range" ]; then
  for i in $(seq 0 "$range"); do
    SLURM_ARRAY_TASK_ID=$i bash "$1" >/dev/null 2>&1
  done
else
  bash "$1" >/dev/null 2>&1
fi
echo "Submitted batch job 1001"
"#;

    /// Fake `sbatch` that accepts the job without ever running it.
    const BLACKHOLE_SBATCH: &str = r#"#!/bin/bash
echo "Submitted batch job 1002"
"#;

    const FAILING_SBATCH: &str = r#"#!/bin/bash
echo "sbatch: error: invalid partition" >&2
exit 1
"#;

    fn write_stub(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("sbatch");
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn runner(dir: &Path, stub: &Path) -> BatchQueueRunner {
        let mut config = PipelineConfig::new("true", "true");
        config.workdir = dir.to_path_buf();
        config.poll_interval = Duration::from_millis(10);
        config.wait_timeout = Duration::from_millis(300);
        let dirs = RunDirs::create(dir).unwrap();
        let tmp = Arc::new(TempResourceSet::new(true));
        BatchQueueRunner::new(BatchBackend::Slurm, config, dirs, tmp)
            .with_submit_program(stub.to_str().unwrap())
    }

    #[tokio::test]
    async fn single_submits_and_waits_for_marker() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path(), FAKE_SBATCH);
        let mut runner = runner(dir.path(), &stub);
        runner.single("true", &Map::new()).await.unwrap();
    }

    #[tokio::test]
    async fn single_times_out_when_marker_never_appears() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path(), BLACKHOLE_SBATCH);
        let mut runner = runner(dir.path(), &stub);
        let err = runner.single("true", &Map::new()).await.unwrap_err();
        match err {
            ZdError::WaitTimeout { missing } => assert_eq!(missing.len(), 1),
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_submission_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path(), FAILING_SBATCH);
        let mut runner = runner(dir.path(), &stub);
        let err = runner.single("true", &Map::new()).await.unwrap_err();
        assert!(matches!(err, ZdError::SubmissionFailed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn parallel_submits_one_array_job() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path(), FAKE_SBATCH);
        let mut runner = runner(dir.path(), &stub);

        let mut parallel_args = Map::new();
        parallel_args.insert(
            "object".to_string(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        let statuses = runner
            .parallel("true", &parallel_args, &Map::new())
            .await
            .unwrap();
        assert_eq!(statuses, vec![TaskStatus::Signalled; 3]);
    }
}
