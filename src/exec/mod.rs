//! Execution backends for the redshift pipeline.
//!
//! A pipeline run is split into two stages: per-bunch processing and a final merge.
//! The [`worker`] layer expresses those stages as backend-specific submissions
//! (in-process pool, or Slurm/PBS batch jobs), while the [`runner`] layer offers a
//! lower-level single/fan-out execution API on top of the same plumbing. Batch
//! completion is observed through filesystem markers, never through callbacks.

pub mod config;
pub mod registry;
pub mod runner;
pub mod script;
pub mod semaphore;
pub mod tempset;
pub mod worker;

pub use config::{PipelineConfig, RunDirs};
pub use registry::{BackendContext, BackendRegistry};
pub use tempset::TempResourceSet;

pub type TaskId = String;

/// Creates an opaque task identifier, unique within a run with overwhelming
/// probability. It is embedded in script, log and completion marker filenames.
pub fn make_task_id(command: &str) -> TaskId {
    let name = command
        .rsplit('/')
        .next()
        .unwrap_or(command)
        .replace(' ', "-");
    format!("{}-{:08x}", name, rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::make_task_id;

    #[test]
    fn task_id_strips_command_path() {
        let id = make_task_id("/usr/bin/process_spectra");
        assert!(id.starts_with("process_spectra-"));
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(make_task_id("merge"), make_task_id("merge"));
    }
}
