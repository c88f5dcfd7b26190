//! # Task Descriptor & Registry
//!
//! A descriptor captures a handler's context schema, result schema,
//! and the closure that runs it. Registration in the source system
//! reflects the handler's signature at runtime; Rust has no such
//! reflection, so the context/result types are pinned at compile time
//! via the [`Schema`] bound instead — `BadHandlerSignature` becomes
//! unreachable for well-typed handlers and is reserved for the one
//! remaining runtime check, an empty task name.
//!
//! The registry stores heterogeneous descriptors behind the
//! object-safe [`ErasedTaskDescriptor`] trait, the same technique used
//! for [`crate::resilience::CircuitBreakerBehavior`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use uuid::Uuid;

use crate::envelope::TaskEnvelope;
use crate::error::{HandlerError, TaskerError, TaskerResult};
use crate::serialization::{tag, untag, Schema, TaggedValue};

type HandlerFuture<R> = Pin<Box<dyn Future<Output = Result<R, HandlerError>> + Send>>;
type HandlerFn<C, R> = Arc<dyn Fn(Uuid, C) -> HandlerFuture<R> + Send + Sync>;

/// A handler invocation bound to one envelope, erased to a single
/// schema-tagged-in, schema-tagged-out future. Awaiting `run` is the
/// "invoke the handler" half of `Task::execute`.
pub struct HydratedTask {
    pub agent_id: Uuid,
    pub task_name: String,
    pub run: HandlerFuture<TaggedValue>,
}

impl std::fmt::Debug for HydratedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydratedTask")
            .field("agent_id", &self.agent_id)
            .field("task_name", &self.task_name)
            .finish_non_exhaustive()
    }
}

/// An immutable, per-handler registration: name, inferred context and
/// result schemas, and the handler closure.
pub struct TaskDescriptor<C, R> {
    name: String,
    handler: HandlerFn<C, R>,
}

impl<C, R> std::fmt::Debug for TaskDescriptor<C, R>
where
    C: Schema,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("context_schema", &C::SCHEMA_ID)
            .finish_non_exhaustive()
    }
}

impl<C, R> TaskDescriptor<C, R>
where
    C: Schema,
    R: Schema,
{
    /// Build a descriptor from an async handler `(agent_id, context) -> Result<R, HandlerError>`.
    ///
    /// Fails with `BadHandlerSignature` only for the one check Rust's
    /// type system cannot make for us: a blank task name.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> TaskerResult<Self>
    where
        F: Fn(Uuid, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TaskerError::BadHandlerSignature(
                name,
                "task name must not be blank".to_string(),
            ));
        }

        Ok(Self {
            name,
            handler: Arc::new(move |agent_id, context| Box::pin(handler(agent_id, context))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Object-safe facade over [`TaskDescriptor<C, R>`] so the registry can
/// hold descriptors of different `C`/`R` in one map.
pub trait ErasedTaskDescriptor: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn context_schema_id(&self) -> &'static str;
    fn result_schema_id(&self) -> &'static str;

    /// Validate the envelope's context against this descriptor's
    /// schema and bind it to a runnable, erased task.
    fn hydrate(&self, envelope: &TaskEnvelope) -> TaskerResult<HydratedTask>;
}

impl<C, R> ErasedTaskDescriptor for TaskDescriptor<C, R>
where
    C: Schema,
    R: Schema,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn context_schema_id(&self) -> &'static str {
        C::SCHEMA_ID
    }

    fn result_schema_id(&self) -> &'static str {
        R::SCHEMA_ID
    }

    fn hydrate(&self, envelope: &TaskEnvelope) -> TaskerResult<HydratedTask> {
        let context: C = untag(&envelope.context)?;
        let agent_id = envelope.agent_id;
        let task_name = self.name.clone();
        let handler = self.handler.clone();

        let run: HandlerFuture<TaggedValue> = Box::pin(async move {
            let result = handler(agent_id, context).await?;
            tag(&result).map_err(|err| HandlerError::new(err.to_string()))
        });

        Ok(HydratedTask {
            agent_id,
            task_name,
            run,
        })
    }
}

/// Holds every registered task descriptor, keyed by task name.
///
/// Safe to mutate only before a worker pool spawns workers (spec
/// §4.7): post-spawn registrations are not propagated to already
/// running workers, since each worker process rebuilds its own
/// registry from the same static registration call in `main` (see
/// `WorkerBootConfig` in `tasker-worker`).
#[derive(Debug, Default)]
pub struct TaskRegistry {
    descriptors: HashMap<String, Arc<dyn ErasedTaskDescriptor>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C, R>(&mut self, descriptor: TaskDescriptor<C, R>)
    where
        C: Schema,
        R: Schema,
    {
        self.descriptors
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ErasedTaskDescriptor>> {
        self.descriptors.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Look up the descriptor named by the envelope and hydrate it.
    /// Fails with `UnknownTask` if nothing is registered under that name.
    pub fn hydrate(&self, envelope: &TaskEnvelope) -> TaskerResult<HydratedTask> {
        let descriptor = self
            .get(&envelope.task_name)
            .ok_or_else(|| TaskerError::UnknownTask(envelope.task_name.clone()))?;
        descriptor.hydrate(envelope)
    }
}
