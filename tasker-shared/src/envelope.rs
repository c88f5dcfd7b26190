//! # Task Envelope
//!
//! The only thing that crosses the queue boundary: a task name, a
//! schema-tagged context, and the correlation key every downstream
//! component joins on.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::serialization::TaggedValue;

/// Wire record pushed to and popped from the configured queue list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Identifies which registered descriptor should hydrate this envelope.
    pub task_name: String,
    /// Schema-tagged handler input.
    pub context: TaggedValue,
    /// Stable correlation key across queue, activity, and result.
    pub agent_id: Uuid,
}

impl TaskEnvelope {
    pub fn new(task_name: impl Into<String>, context: TaggedValue, agent_id: Uuid) -> Self {
        Self {
            task_name: task_name.into(),
            context,
            agent_id,
        }
    }
}
