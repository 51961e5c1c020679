use std::path::PathBuf;

use thiserror::Error;

use crate::common::error::ZdError::GenericError;

#[derive(Debug, Error)]
pub enum ZdError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Inconsistent parallel argument arity: {0}")]
    InconsistentArity(String),
    #[error("Timed out waiting for completion markers, missing: {missing:?}")]
    WaitTimeout { missing: Vec<PathBuf> },
    #[error("Process `{command}` exited with code {exit_code}")]
    ProcessFailed { command: String, exit_code: i32 },
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<anyhow::Error> for ZdError {
    fn from(error: anyhow::Error) -> Self {
        GenericError(format!("{error:?}"))
    }
}

impl From<String> for ZdError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}
