//! # tasker-shared
//!
//! The foundation crate of the task-execution substrate: the error
//! taxonomy, layered configuration, the schema-tagged wire format, the
//! task envelope, the task descriptor/registry, the [`StateBackend`]
//! capability set (in-memory + Postgres), the [`activity::ActivityStore`],
//! and a small circuit breaker used to shield backend calls from
//! cascading failure. Every other crate in the workspace depends on
//! this one; it depends on nothing workspace-local.

pub mod activity;
pub mod backend;
pub mod config;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod resilience;
pub mod serialization;

pub use activity::{ActivityStore, ActivityStoreError};
pub use backend::{BackendError, Priority, StateBackend, StateBackendKind};
pub use config::TaskerCoreConfig;
pub use envelope::TaskEnvelope;
pub use error::{HandlerError, TaskerError, TaskerResult};
pub use registry::{ErasedTaskDescriptor, HydratedTask, TaskDescriptor, TaskRegistry};
pub use serialization::{tag, untag, Schema, SerializationError, TaggedValue};
