//! # Queue Facade
//!
//! Thin layer over the backend's list primitive: mints an agent-id,
//! creates the Queued activity, schema-tags and serializes the
//! envelope, and pushes it onto the configured list according to
//! priority. These steps are deliberately not atomic with each other —
//! a crash between activity-create and the backend push leaves a
//! stranded Queued activity that `cancel_pending` later sweeps, an
//! accepted design tradeoff.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use tasker_shared::{
    activity::ActivityStore, backend::Priority, config::ActivityMessagesConfig, error::TaskerResult,
    registry::TaskRegistry, serialization::tag, Schema, StateBackend, StateBackendKind,
    TaskEnvelope,
};

use crate::error::QueueError;

/// A handle to an enqueued task, returned by [`Queue::enqueue`] so the
/// caller may later await its result by `agent_id` through a
/// [`crate::result::ResultRendezvous`] — the `R` marker pins the
/// result type the caller expects without costing a runtime field.
#[derive(Debug, Clone, Copy)]
pub struct EnqueuedTask<R> {
    pub agent_id: Uuid,
    _result: PhantomData<fn() -> R>,
}

impl<R> EnqueuedTask<R> {
    fn new(agent_id: Uuid) -> Self {
        Self {
            agent_id,
            _result: PhantomData,
        }
    }
}

/// Facade over the state backend's list primitive plus enqueue-time
/// activity creation. Cheap to clone (every field is an `Arc` or
/// already-`Clone` handle).
#[derive(Debug, Clone)]
pub struct Queue {
    backend: StateBackendKind,
    activity: Arc<dyn ActivityStore>,
    registry: Arc<TaskRegistry>,
    queue_name: String,
    messages: ActivityMessagesConfig,
}

impl Queue {
    pub fn new(
        backend: StateBackendKind,
        activity: Arc<dyn ActivityStore>,
        registry: Arc<TaskRegistry>,
        queue_name: impl Into<String>,
        messages: ActivityMessagesConfig,
    ) -> Self {
        Self {
            backend,
            activity,
            registry,
            queue_name: queue_name.into(),
            messages,
        }
    }

    /// Enqueue `context` under `task_name` at the given priority.
    ///
    /// 1. Look up the descriptor; fail with `UnknownTask` if unregistered.
    /// 2. Validate `context`'s schema matches the descriptor's.
    /// 3. Mint an agent-id and create the Queued activity.
    /// 4. Schema-tag and serialize the envelope.
    /// 5. `push_front` (High) or `push_back` (Low).
    /// 6. Return an `EnqueuedTask<R>` for later rendezvous.
    #[instrument(skip(self, context), fields(task_name))]
    pub async fn enqueue<C, R>(
        &self,
        task_name: &str,
        context: C,
        priority: Priority,
        metadata: Option<HashMap<String, String>>,
    ) -> TaskerResult<EnqueuedTask<R>>
    where
        C: Schema,
        R: Schema,
    {
        let descriptor = self
            .registry
            .get(task_name)
            .ok_or_else(|| QueueError::UnknownTask(task_name.to_string()))?;

        if descriptor.context_schema_id() != C::SCHEMA_ID {
            return Err(QueueError::ContextSchemaMismatch {
                task: task_name.to_string(),
                expected: descriptor.context_schema_id(),
                found: C::SCHEMA_ID,
            }
            .into());
        }
        if descriptor.result_schema_id() != R::SCHEMA_ID {
            return Err(QueueError::ResultSchemaMismatch {
                task: task_name.to_string(),
                expected: descriptor.result_schema_id(),
                found: R::SCHEMA_ID,
            }
            .into());
        }

        let agent_id = Uuid::new_v4();
        self.activity
            .create(task_name, Some(agent_id), &self.messages.queued, metadata)
            .await?;

        let tagged = tag(&context)?;
        let envelope = TaskEnvelope::new(task_name, tagged, agent_id);
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| tasker_shared::TaskerError::SerializationError(e.to_string()))?;

        match priority {
            Priority::High => self.backend.push_front(&self.queue_name, bytes).await?,
            Priority::Low => self.backend.push_back(&self.queue_name, bytes).await?,
        }

        debug!(%agent_id, %task_name, ?priority, "enqueued task");
        Ok(EnqueuedTask::new(agent_id))
    }
}
