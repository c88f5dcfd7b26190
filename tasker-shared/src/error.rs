//! # Error Taxonomy
//!
//! `TaskerError` is the top-level error type returned from public APIs
//! across the substrate. Component-local errors (`BackendError`,
//! `ActivityStoreError`, `SerializationError`) are folded into it at the
//! crate boundary so callers only need to match on one enum.

use thiserror::Error;

use crate::backend::BackendError;
use crate::serialization::SerializationError as WireError;

/// Result alias used throughout the crate family.
pub type TaskerResult<T> = Result<T, TaskerError>;

#[derive(Debug, Error)]
pub enum TaskerError {
    /// Enqueue referenced a task name with no registered descriptor.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// An operation addressed an agent-id with no activity header.
    #[error("unknown agent: {0}")]
    UnknownAgent(uuid::Uuid),

    /// `create` was called with an `agent_id` that already has a header.
    #[error("duplicate agent: {0}")]
    DuplicateAgent(uuid::Uuid),

    /// Registration was attempted with a handler whose context or result
    /// type does not satisfy the `Schema` bound.
    #[error("bad handler signature for task '{0}': {1}")]
    BadHandlerSignature(String, String),

    /// An envelope or result value could not be tagged or untagged.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// `wait_result` exceeded its timeout without observing a value.
    #[error("result timeout waiting for agent {0}")]
    ResultTimeout(uuid::Uuid),

    /// Pipeline type-flow validation failed at bind time or first run.
    #[error("pipeline type error: {0}")]
    PipelineTypeError(String),

    /// A handler raised (or panicked). Always caught by `Task::execute`
    /// and never escapes the worker loop.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// The state backend became unreachable. Terminal for the worker
    /// that observed it.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Pass-through for the activity store.
    #[error("activity store error: {0}")]
    ActivityStoreError(String),

    /// Pass-through for configuration loading failures.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<BackendError> for TaskerError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => TaskerError::BackendUnavailable(msg),
            BackendError::Serialization(msg) => TaskerError::SerializationError(msg),
            other => TaskerError::BackendUnavailable(other.to_string()),
        }
    }
}

/// Error raised inside a handler body. Handlers return
/// `Result<R, HandlerError>` rather than being allowed to unwind past
/// `Task::execute` — a panic is also caught and converted into one.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<HandlerError> for TaskerError {
    fn from(err: HandlerError) -> Self {
        TaskerError::HandlerError(err.message)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::new(err.to_string())
    }
}

impl From<WireError> for TaskerError {
    fn from(err: WireError) -> Self {
        TaskerError::SerializationError(err.to_string())
    }
}

impl From<crate::activity::ActivityStoreError> for TaskerError {
    fn from(err: crate::activity::ActivityStoreError) -> Self {
        use crate::activity::ActivityStoreError as E;
        match err {
            E::UnknownAgent(id) => TaskerError::UnknownAgent(id),
            E::DuplicateAgent(id) => TaskerError::DuplicateAgent(id),
            E::Storage(msg) => TaskerError::ActivityStoreError(msg),
        }
    }
}
