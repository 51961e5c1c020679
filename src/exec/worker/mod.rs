pub mod debug;
pub mod local;
pub mod slurm;

use std::future::Future;
use std::pin::Pin;

use crate::Map;
use crate::bunch::{Bunch, BunchId};
use crate::exec::config::PipelineConfig;
use crate::exec::runner::TaskStatus;

pub use debug::DebugWorker;
pub use local::LocalWorker;
pub use slurm::SlurmWorker;

/// One unit of pipeline work, immutable once created.
///
/// The worker façade turns a spec into a backend-specific submission of the
/// configured stage command.
#[derive(Debug, Clone)]
pub enum TaskSpec {
    /// Process the spectra of one bunch.
    ProcessBunch { bunch: Bunch },
    /// Merge the per-bunch outputs of the given bunches into the final catalog.
    Finalize { bunch_ids: Vec<BunchId> },
}

impl TaskSpec {
    pub fn command<'a>(&self, config: &'a PipelineConfig) -> &'a str {
        match self {
            TaskSpec::ProcessBunch { .. } => &config.process_command,
            TaskSpec::Finalize { .. } => &config.finalize_command,
        }
    }

    /// Arguments of the stage command: the shared pipeline arguments plus the
    /// stage-specific ones.
    pub fn args(&self, config: &PipelineConfig) -> Map<String, String> {
        let mut args = config.shared_args.clone();
        match self {
            TaskSpec::ProcessBunch { bunch } => {
                args.insert("bunch-id".to_string(), bunch.id().to_string());
                args.insert(
                    "objects".to_string(),
                    bunch
                        .items()
                        .iter()
                        .map(|item| item.id())
                        .collect::<Vec<_>>()
                        .join(","),
                );
            }
            TaskSpec::Finalize { bunch_ids } => {
                args.insert(
                    "bunch-ids".to_string(),
                    bunch_ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                );
            }
        }
        args
    }

    /// Short description used in log messages and batch job names.
    pub fn label(&self) -> String {
        match self {
            TaskSpec::ProcessBunch { bunch } => format!("bunch-{}", bunch.id()),
            TaskSpec::Finalize { .. } => "finalize".to_string(),
        }
    }
}

pub type WorkerFuture<'a, T> = Pin<Box<dyn Future<Output = crate::Result<T>> + 'a>>;

/// Backend façade for the two pipeline stages.
///
/// Conceptually every task moves through `Created -> Submitted -> Running ->
/// {Success | Failed}`; only the submission (`run`) and the terminal transition
/// (`wait_all`) are observable at this layer, the `Running` phase belongs to the
/// backend.
pub trait Worker {
    /// Submits one task. Returns once the task has been accepted by the backend,
    /// not once it has finished.
    fn run<'a>(&'a mut self, task: TaskSpec) -> WorkerFuture<'a, ()>;

    /// Blocks until every task submitted through [`Worker::run`] has reached a
    /// terminal state, and reports the states this layer could observe.
    ///
    /// Backends that delegate sequencing to an external scheduler (Slurm) return
    /// immediately with no statuses; the scheduler's job dependency guarantees the
    /// ordering of the finalize stage instead.
    fn wait_all<'a>(&'a mut self) -> WorkerFuture<'a, Vec<TaskStatus>>;
}
