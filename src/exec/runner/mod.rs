pub mod batch;
pub mod local;

use std::future::Future;
use std::pin::Pin;

use crate::Map;
use crate::common::error::ZdError;

pub use batch::BatchQueueRunner;
pub use local::LocalRunner;

/// Terminal state of one executed task, as far as this layer can observe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// A locally spawned process exited with zero.
    Success,
    /// A locally spawned process exited with a non-zero code.
    Failed { exit_code: i32 },
    /// A batch task's completion marker was observed. The wrapped command's exit
    /// code is recorded inside the marker but not inspected here.
    Signalled,
}

impl TaskStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. })
    }
}

pub type RunnerFuture<'a, T> = Pin<Box<dyn Future<Output = crate::Result<T>> + 'a>>;

/// Executes a single command or a fan-out set of parallel commands.
///
/// Implementations either spawn subprocesses directly ([`LocalRunner`]) or hand the
/// work to an external batch scheduler and synchronize through completion markers
/// ([`BatchQueueRunner`]). There is no retry at this layer; a failed submission is
/// fatal and a wait timeout propagates to the caller.
pub trait Runner {
    /// Executes one task built from `command` and `args` and blocks until it has
    /// finished.
    fn single<'a>(
        &'a mut self,
        command: &'a str,
        args: &'a Map<String, String>,
    ) -> RunnerFuture<'a, ()>;

    /// Executes one task per record of `parallel_args`, sharing `args` between all
    /// of them, and blocks until every task has reached a terminal state. Sibling
    /// tasks are not aborted when one of them fails; the caller inspects the
    /// returned statuses.
    fn parallel<'a>(
        &'a mut self,
        command: &'a str,
        parallel_args: &'a Map<String, Vec<String>>,
        args: &'a Map<String, String>,
    ) -> RunnerFuture<'a, Vec<TaskStatus>>;
}

/// Transposes a mapping of argument name to per-task value lists into one argument
/// record per task.
///
/// Fails before any side effect when the lists differ in length.
pub fn transpose_parallel_args(
    parallel_args: &Map<String, Vec<String>>,
) -> crate::Result<Vec<Map<String, String>>> {
    let mut keys: Vec<_> = parallel_args.keys().collect();
    keys.sort();

    let mut arity = None;
    for key in &keys {
        let len = parallel_args[*key].len();
        match arity {
            None => arity = Some(len),
            Some(expected) if expected != len => {
                return Err(ZdError::InconsistentArity(format!(
                    "argument `{key}` has {len} value(s), expected {expected}"
                )));
            }
            Some(_) => {}
        }
    }

    let count = arity.unwrap_or(0);
    let mut records = vec![Map::new(); count];
    for key in keys {
        for (record, value) in records.iter_mut().zip(&parallel_args[key]) {
            record.insert(key.clone(), value.clone());
        }
    }
    Ok(records)
}
