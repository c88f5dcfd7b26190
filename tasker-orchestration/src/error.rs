//! Component-local error for the queue facade, folded into
//! [`tasker_shared::TaskerError`] at the crate boundary the same way
//! `tasker-shared` folds `BackendError`/`ActivityStoreError` into it.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("context schema mismatch for task '{task}': descriptor expects '{expected}', caller supplied '{found}'")]
    ContextSchemaMismatch {
        task: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("result schema mismatch for task '{task}': descriptor expects '{expected}', caller supplied '{found}'")]
    ResultSchemaMismatch {
        task: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("agent {0} was enqueued with a different result schema than requested")]
    ResultSchemaMissing(Uuid),
}

impl From<QueueError> for tasker_shared::TaskerError {
    fn from(err: QueueError) -> Self {
        use tasker_shared::TaskerError;
        match err {
            QueueError::UnknownTask(name) => TaskerError::UnknownTask(name),
            other => TaskerError::SerializationError(other.to_string()),
        }
    }
}
