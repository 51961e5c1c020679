use std::sync::Arc;

use crate::bunch::{WorkItem, partition_bunches};
use crate::exec::config::{PipelineConfig, RunDirs};
use crate::exec::registry::{BackendContext, BackendRegistry};
use crate::exec::runner::TaskStatus;
use crate::exec::tempset::TempResourceSet;
use crate::exec::worker::{TaskSpec, Worker};

/// Observable outcome of one pipeline run.
#[derive(Debug)]
pub struct RunSummary {
    pub bunch_count: usize,
    /// Per-bunch terminal states, in bunch order. Empty for backends that delegate
    /// sequencing to an external scheduler.
    pub bunch_statuses: Vec<TaskStatus>,
    pub finalize_statuses: Vec<TaskStatus>,
}

impl RunSummary {
    pub fn failed_bunches(&self) -> usize {
        self.bunch_statuses.iter().filter(|s| s.is_failure()).count()
    }
}

/// Sequential driver of one pipeline run.
///
/// Partitions the work set, submits one `ProcessBunch` task per bunch, waits for
/// all of them, then submits the `Finalize` task. Failed bunches do not prevent the
/// finalize submission; the merge stage observes all bunch outcomes and the caller
/// inspects the returned summary. Wait timeouts and submission failures propagate
/// unchanged, this driver never retries.
pub struct Orchestrator {
    worker: Box<dyn Worker>,
}

impl Orchestrator {
    pub fn new(worker: Box<dyn Worker>) -> Orchestrator {
        Orchestrator { worker }
    }

    pub async fn run(
        &mut self,
        items: Vec<WorkItem>,
        bunch_size: usize,
    ) -> crate::Result<RunSummary> {
        let bunches = partition_bunches(items, bunch_size);
        let bunch_ids: Vec<_> = bunches.iter().map(|bunch| bunch.id()).collect();
        log::info!(
            "Dispatching {} bunch(es) of at most {bunch_size} item(s)",
            bunches.len()
        );

        for bunch in bunches {
            self.worker.run(TaskSpec::ProcessBunch { bunch }).await?;
        }
        let bunch_statuses = self.worker.wait_all().await?;

        let failed = bunch_statuses.iter().filter(|s| s.is_failure()).count();
        if failed > 0 {
            log::warn!("{failed} bunch task(s) failed, the merge will see partial results");
        }

        self.worker
            .run(TaskSpec::Finalize {
                bunch_ids: bunch_ids.clone(),
            })
            .await?;
        let finalize_statuses = self.worker.wait_all().await?;

        Ok(RunSummary {
            bunch_count: bunch_ids.len(),
            bunch_statuses,
            finalize_statuses,
        })
    }
}

/// Runs the whole pipeline with the named worker backend.
///
/// Creates the run directory and the temporary-resource scope, drives the
/// orchestrator and drains the scratch artifacts on both the success and the error
/// path (unless the config keeps them).
pub async fn run_pipeline(
    registry: &BackendRegistry,
    backend: &str,
    config: PipelineConfig,
    items: Vec<WorkItem>,
    bunch_size: usize,
) -> crate::Result<RunSummary> {
    let dirs = RunDirs::create(&config.workdir)?;
    let tmp = Arc::new(TempResourceSet::new(config.keep_tmp));
    tmp.add_dirs([dirs.scripts(), dirs.signals()]);

    let ctx = BackendContext {
        config,
        dirs,
        tmp: tmp.clone(),
    };
    let worker = registry.create_worker(backend, &ctx)?;

    let result = Orchestrator::new(worker).run(items, bunch_size).await;
    tmp.cleanup();
    result
}
