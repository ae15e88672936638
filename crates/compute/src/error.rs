use std::time::Duration;

use vantage_core::VantageError;

use crate::modules::{ComputeError, SupportedModule};

/// Errors surfaced by the task manager.
///
/// `Clone` so one outcome can be broadcast to every waiter of a computation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Unknown module: {0}")]
    UnknownModule(String),
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    #[error("Module {0} requires a pipeline index")]
    MissingPipeline(SupportedModule),
    #[error("Dataset split not found: {0}")]
    UnknownSplit(String),
    #[error("Computation failed: {0}")]
    Computation(String),
    #[error("Computation timed out after {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    /// Errors caused by the request itself. These are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TaskError::UnknownModule(_)
                | TaskError::InvalidFilter(_)
                | TaskError::MissingPipeline(_)
                | TaskError::UnknownSplit(_)
        )
    }

    pub(crate) fn from_compute(module: SupportedModule, err: ComputeError) -> Self {
        match err {
            ComputeError::MissingPipeline => TaskError::MissingPipeline(module),
            other => TaskError::Computation(format!("{}: {}", module, other)),
        }
    }
}

impl From<VantageError> for TaskError {
    fn from(e: VantageError) -> Self {
        match e {
            VantageError::InvalidFilter(msg) => TaskError::InvalidFilter(msg),
            VantageError::SplitNotFound(name) => TaskError::UnknownSplit(name),
            other => TaskError::Computation(other.to_string()),
        }
    }
}
