use std::sync::Arc;

use crate::common::utils::fs::absolute_path;
use crate::exec::config::{PipelineConfig, RunDirs};
use crate::exec::make_task_id;
use crate::exec::runner::TaskStatus;
use crate::exec::runner::batch::submit_script;
use crate::exec::script::{BatchBackend, ScriptSpec, build_afterany};
use crate::exec::tempset::TempResourceSet;
use crate::exec::worker::{TaskSpec, Worker, WorkerFuture};

/// Submits both pipeline stages to Slurm.
///
/// Each bunch becomes its own batch job; the job ids returned by `sbatch` are
/// accumulated so that the finalize job can be submitted with an `afterany`
/// dependency on all of them. The merge therefore starts only once every bunch job
/// has reached a terminal state, successful or not, and no polling is needed here.
pub struct SlurmWorker {
    config: PipelineConfig,
    dirs: RunDirs,
    tmp: Arc<TempResourceSet>,
    submit_program: String,
    bunch_job_ids: Vec<String>,
}

impl SlurmWorker {
    pub fn new(config: PipelineConfig, dirs: RunDirs, tmp: Arc<TempResourceSet>) -> SlurmWorker {
        SlurmWorker {
            config,
            dirs,
            tmp,
            submit_program: BatchBackend::Slurm.submit_program().to_string(),
            bunch_job_ids: Vec::new(),
        }
    }

    /// Overrides the submission executable, e.g. with an absolute path to `sbatch`.
    pub fn with_submit_program(mut self, program: impl Into<String>) -> SlurmWorker {
        self.submit_program = program.into();
        self
    }

    /// Job ids of the bunch jobs submitted so far.
    pub fn bunch_job_ids(&self) -> &[String] {
        &self.bunch_job_ids
    }

    fn script_spec(&self, task: &TaskSpec) -> ScriptSpec {
        let command = task.command(&self.config);
        ScriptSpec {
            task_id: make_task_id(command),
            job_name: format!("zdispatch-{}", task.label()),
            workdir: absolute_path(self.config.workdir.clone()),
            env_activation: self.config.env_activation.clone(),
            command: command.to_string(),
            args: task.args(&self.config),
            signal_dir: self.dirs.signals(),
            log_dir: self.dirs.logs(),
            submit_args: self.config.submit_args.clone(),
            dependency: None,
            array: None,
        }
    }
}

impl Worker for SlurmWorker {
    fn run<'a>(&'a mut self, task: TaskSpec) -> WorkerFuture<'a, ()> {
        Box::pin(async move {
            let mut spec = self.script_spec(&task);
            let is_finalize = matches!(task, TaskSpec::Finalize { .. });
            if is_finalize && !self.bunch_job_ids.is_empty() {
                spec.dependency = Some(build_afterany(&self.bunch_job_ids));
            }

            let job_id = submit_script(
                &spec,
                BatchBackend::Slurm,
                &self.submit_program,
                &self.dirs,
                &self.tmp,
            )
            .await?;
            log::info!("Submitted {} as Slurm job {job_id}", task.label());

            if !is_finalize {
                self.bunch_job_ids.push(job_id);
            }
            Ok(())
        })
    }

    fn wait_all<'a>(&'a mut self) -> WorkerFuture<'a, Vec<TaskStatus>> {
        // Sequencing is owned by Slurm through the dependency expression; there is
        // nothing to poll at this layer.
        Box::pin(async move { Ok(Vec::new()) })
    }
}
