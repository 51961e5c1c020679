use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::common::error::ZdError;
use crate::exec::config::PipelineConfig;
use crate::exec::runner::TaskStatus;
use crate::exec::runner::local::run_process;
use crate::exec::script::flatten_args;
use crate::exec::worker::{TaskSpec, Worker, WorkerFuture};

/// Runs both pipeline stages as subprocesses of the current process, bounded by the
/// configured concurrency.
pub struct LocalWorker {
    config: PipelineConfig,
    pool: Arc<Semaphore>,
    handles: Vec<JoinHandle<crate::Result<TaskStatus>>>,
}

impl LocalWorker {
    pub fn new(config: PipelineConfig) -> LocalWorker {
        let pool = Arc::new(Semaphore::new(config.effective_concurrency()));
        LocalWorker {
            config,
            pool,
            handles: Vec::new(),
        }
    }
}

impl Worker for LocalWorker {
    fn run<'a>(&'a mut self, task: TaskSpec) -> WorkerFuture<'a, ()> {
        Box::pin(async move {
            let command = task.command(&self.config).to_string();
            let args = flatten_args(&task.args(&self.config));
            log::debug!("Submitting {} to the local pool", task.label());

            let pool = self.pool.clone();
            self.handles.push(tokio::spawn(async move {
                let _permit = pool.acquire_owned().await.expect("Worker pool closed");
                run_process(command, args).await
            }));
            Ok(())
        })
    }

    fn wait_all<'a>(&'a mut self) -> WorkerFuture<'a, Vec<TaskStatus>> {
        Box::pin(async move {
            let handles = std::mem::take(&mut self.handles);
            let mut statuses = Vec::with_capacity(handles.len());
            for joined in join_all(handles).await {
                let status = joined
                    .map_err(|e| ZdError::GenericError(format!("Task panicked: {e}")))??;
                statuses.push(status);
            }

            let failed = statuses.iter().filter(|s| s.is_failure()).count();
            if failed > 0 {
                log::warn!("{failed} of {} local task(s) failed", statuses.len());
            }
            Ok(statuses)
        })
    }
}
