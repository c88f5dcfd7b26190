//! # tasker-orchestration
//!
//! The composition layer above `tasker-shared`: the queue facade
//! (enqueue-time activity creation plus priority push), the result
//! rendezvous (TTL'd KV plus poll-based wait/join), and the pipeline
//! engine (type-flow-validated step chains bound to task handlers).

pub mod error;
pub mod pipeline;
pub mod queue;
pub mod result;

pub use error::QueueError;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineDescriptor, PipelineStep, StepInput, StepOutput};
pub use queue::{EnqueuedTask, Queue};
pub use result::ResultRendezvous;
