use std::sync::Arc;

use crate::Map;
use crate::common::error::error;
use crate::exec::config::{PipelineConfig, RunDirs};
use crate::exec::runner::{BatchQueueRunner, LocalRunner, Runner};
use crate::exec::script::BatchBackend;
use crate::exec::tempset::TempResourceSet;
use crate::exec::worker::{DebugWorker, LocalWorker, SlurmWorker, Worker};

/// Everything a backend constructor needs for one pipeline run.
#[derive(Clone)]
pub struct BackendContext {
    pub config: PipelineConfig,
    pub dirs: RunDirs,
    pub tmp: Arc<TempResourceSet>,
}

type WorkerFactory = Box<dyn Fn(&BackendContext) -> crate::Result<Box<dyn Worker>>>;
type RunnerFactory = Box<dyn Fn(&BackendContext) -> crate::Result<Box<dyn Runner>>>;

/// Maps backend names to worker/runner constructors.
///
/// Built once at process start and passed by reference; there is no global
/// registration. Tests register fake backends through
/// [`BackendRegistry::register_worker`].
#[derive(Default)]
pub struct BackendRegistry {
    workers: Map<String, WorkerFactory>,
    runners: Map<String, RunnerFactory>,
}

impl BackendRegistry {
    pub fn new() -> BackendRegistry {
        Self::default()
    }

    /// Registry with the built-in backends: workers `local`, `debug`, `slurm` and
    /// runners `local`, `slurm`, `pbs`.
    pub fn with_defaults() -> BackendRegistry {
        let mut registry = Self::new();
        registry.register_worker("local", |ctx| {
            Ok(Box::new(LocalWorker::new(ctx.config.clone())))
        });
        registry.register_worker("debug", |_ctx| Ok(Box::new(DebugWorker::new())));
        registry.register_worker("slurm", |ctx| {
            Ok(Box::new(SlurmWorker::new(
                ctx.config.clone(),
                ctx.dirs.clone(),
                ctx.tmp.clone(),
            )))
        });

        registry.register_runner("local", |ctx| {
            Ok(Box::new(LocalRunner::new(ctx.config.concurrency)))
        });
        registry.register_runner("slurm", |ctx| {
            Ok(Box::new(BatchQueueRunner::new(
                BatchBackend::Slurm,
                ctx.config.clone(),
                ctx.dirs.clone(),
                ctx.tmp.clone(),
            )))
        });
        registry.register_runner("pbs", |ctx| {
            Ok(Box::new(BatchQueueRunner::new(
                BatchBackend::Pbs,
                ctx.config.clone(),
                ctx.dirs.clone(),
                ctx.tmp.clone(),
            )))
        });
        registry
    }

    pub fn register_worker<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendContext) -> crate::Result<Box<dyn Worker>> + 'static,
    {
        self.workers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_runner<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendContext) -> crate::Result<Box<dyn Runner>> + 'static,
    {
        self.runners.insert(name.to_string(), Box::new(factory));
    }

    pub fn create_worker(
        &self,
        name: &str,
        ctx: &BackendContext,
    ) -> crate::Result<Box<dyn Worker>> {
        match self.workers.get(name) {
            Some(factory) => factory(ctx),
            None => error(format!(
                "Unknown worker backend `{name}`, expected one of: {}",
                self.worker_names().join(", ")
            )),
        }
    }

    pub fn create_runner(
        &self,
        name: &str,
        ctx: &BackendContext,
    ) -> crate::Result<Box<dyn Runner>> {
        match self.runners.get(name) {
            Some(factory) => factory(ctx),
            None => error(format!(
                "Unknown runner backend `{name}`, expected one of: {}",
                self.runner_names().join(", ")
            )),
        }
    }

    pub fn worker_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workers.keys().map(|name| name.as_str()).collect();
        names.sort();
        names
    }

    pub fn runner_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.runners.keys().map(|name| name.as_str()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BackendContext, BackendRegistry};
    use crate::exec::config::{PipelineConfig, RunDirs};
    use crate::exec::tempset::TempResourceSet;
    use crate::exec::worker::DebugWorker;

    fn context(dir: &std::path::Path) -> BackendContext {
        let mut config = PipelineConfig::new("process_spectra", "merge_results");
        config.workdir = dir.to_path_buf();
        BackendContext {
            config,
            dirs: RunDirs::create(dir).unwrap(),
            tmp: Arc::new(TempResourceSet::new(true)),
        }
    }

    #[test]
    fn default_backends_are_registered() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.worker_names(), ["debug", "local", "slurm"]);
        assert_eq!(registry.runner_names(), ["local", "pbs", "slurm"]);
    }

    #[test]
    fn creates_registered_worker() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = BackendRegistry::with_defaults();
        registry.create_worker("debug", &context(dir.path())).unwrap();
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = BackendRegistry::with_defaults();
        let err = registry
            .create_worker("pbs", &context(dir.path()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("debug, local, slurm"), "{err}");
    }

    #[test]
    fn fake_backend_can_be_registered() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut registry = BackendRegistry::new();
        registry.register_worker("fake", |_ctx| Ok(Box::new(DebugWorker::new())));
        registry.create_worker("fake", &context(dir.path())).unwrap();
    }
}
