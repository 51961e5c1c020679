use crate::exec::runner::TaskStatus;
use crate::exec::worker::{TaskSpec, Worker, WorkerFuture};

/// Accepts tasks without executing anything. Used to validate the orchestration
/// path (partitioning, submission order, stage sequencing) without doing real work.
#[derive(Default)]
pub struct DebugWorker {
    submitted: Vec<String>,
}

impl DebugWorker {
    pub fn new() -> DebugWorker {
        Self::default()
    }

    /// Labels of the tasks submitted so far, in submission order.
    pub fn submitted(&self) -> &[String] {
        &self.submitted
    }
}

impl Worker for DebugWorker {
    fn run<'a>(&'a mut self, task: TaskSpec) -> WorkerFuture<'a, ()> {
        Box::pin(async move {
            log::info!("Debug worker received {}", task.label());
            self.submitted.push(task.label());
            Ok(())
        })
    }

    fn wait_all<'a>(&'a mut self) -> WorkerFuture<'a, Vec<TaskStatus>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}
