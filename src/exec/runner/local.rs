use std::sync::Arc;

use anyhow::Context;
use bstr::ByteSlice;
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::Map;
use crate::common::error::ZdError;
use crate::exec::runner::{Runner, RunnerFuture, TaskStatus, transpose_parallel_args};
use crate::exec::script::flatten_args;

/// Executes tasks as subprocesses of the current process, fanning out through a
/// bounded pool.
pub struct LocalRunner {
    concurrency: usize,
}

impl LocalRunner {
    pub fn new(concurrency: i32) -> LocalRunner {
        LocalRunner {
            concurrency: concurrency.max(1) as usize,
        }
    }
}

impl Runner for LocalRunner {
    fn single<'a>(
        &'a mut self,
        command: &'a str,
        args: &'a Map<String, String>,
    ) -> RunnerFuture<'a, ()> {
        Box::pin(async move {
            match run_process(command.to_string(), flatten_args(args)).await? {
                TaskStatus::Failed { exit_code } => Err(ZdError::ProcessFailed {
                    command: command.to_string(),
                    exit_code,
                }),
                _ => Ok(()),
            }
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
            let semaphore = Arc::new(Semaphore::new(self.concurrency));

            let mut handles = Vec::with_capacity(records.len());
            for record in records {
                let mut task_args = args.clone();
                task_args.extend(record);
                let argv = flatten_args(&task_args);
                let command = command.to_string();
                let semaphore = semaphore.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("Runner semaphore closed");
                    run_process(command, argv).await
                }));
            }

            let mut statuses = Vec::with_capacity(handles.len());
            for joined in join_all(handles).await {
                let status = joined
                    .map_err(|e| ZdError::GenericError(format!("Task panicked: {e}")))??;
                statuses.push(status);
            }
            Ok(statuses)
        })
    }
}

pub(crate) async fn run_process(command: String, args: Vec<String>) -> crate::Result<TaskStatus> {
    log::debug!("Running local command `{} {}`", command, args.join(" "));
    let output = tokio::process::Command::new(&command)
        .args(&args)
        .output()
        .await
        .with_context(|| format!("{command} start failed"))?;

    if output.status.success() {
        Ok(TaskStatus::Success)
    } else {
        let exit_code = output.status.code().unwrap_or(-1);
        log::warn!(
            "Command `{command}` exited with code {exit_code}\nStderr: {}",
            output.stderr.to_str_lossy().trim()
        );
        Ok(TaskStatus::Failed { exit_code })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::LocalRunner;
    use crate::Map;
    use crate::common::error::ZdError;
    use crate::exec::runner::{Runner, TaskStatus};

    const STUB: &str = r#"#!/bin/bash
code=0
for arg in "$@"; do
  case "$arg" in
    --code=*) code="${arg#--code=}" ;;
    --touch=*) : > "${arg#--touch=}" ;;
  esac
done
exit "$code"
"#;

    fn write_stub(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("stub.sh");
        std::fs::write(&path, STUB).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn single_arg(key: &str, value: impl Into<String>) -> Map<String, String> {
        let mut args = Map::new();
        args.insert(key.to_string(), value.into());
        args
    }

    #[tokio::test]
    async fn single_succeeds_on_zero_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path());
        let touched = dir.path().join("ran");

        let mut runner = LocalRunner::new(1);
        runner
            .single(
                stub.to_str().unwrap(),
                &single_arg("touch", touched.to_str().unwrap()),
            )
            .await
            .unwrap();
        assert!(touched.exists());
    }

    #[tokio::test]
    async fn single_fails_on_nonzero_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path());

        let mut runner = LocalRunner::new(1);
        let err = runner
            .single(stub.to_str().unwrap(), &single_arg("code", "3"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ZdError::ProcessFailed { exit_code: 3, .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn parallel_reports_individual_statuses() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path());

        let mut parallel_args = Map::new();
        parallel_args.insert(
            "code".to_string(),
            vec!["0".to_string(), "2".to_string(), "0".to_string()],
        );

        let mut runner = LocalRunner::new(2);
        let statuses = runner
            .parallel(stub.to_str().unwrap(), &parallel_args, &Map::new())
            .await
            .unwrap();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Success,
                TaskStatus::Failed { exit_code: 2 },
                TaskStatus::Success
            ]
        );
    }

    #[tokio::test]
    async fn parallel_arity_mismatch_runs_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path());
        let touched = dir.path().join("must-not-exist");

        let mut parallel_args = Map::new();
        parallel_args.insert(
            "touch".to_string(),
            vec![touched.to_str().unwrap().to_string()],
        );
        parallel_args.insert("code".to_string(), vec!["0".to_string(), "0".to_string()]);

        let mut runner = LocalRunner::new(2);
        let err = runner
            .parallel(stub.to_str().unwrap(), &parallel_args, &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ZdError::InconsistentArity(_)), "{err:?}");
        assert!(!touched.exists());
    }

    #[tokio::test]
    async fn zero_concurrency_is_treated_as_one() {
        let dir = tempfile::TempDir::new().unwrap();
        let stub = write_stub(dir.path());

        let mut parallel_args = Map::new();
        parallel_args.insert("code".to_string(), vec!["0".to_string(), "0".to_string()]);

        let mut runner = LocalRunner::new(0);
        let statuses = runner
            .parallel(stub.to_str().unwrap(), &parallel_args, &Map::new())
            .await
            .unwrap();
        assert_eq!(statuses.len(), 2);
    }
}
