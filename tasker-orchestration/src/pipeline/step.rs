//! # Pipeline Step
//!
//! [`PipelineStep`] is the object-safe facade over a single typed step
//! so [`super::builder::Pipeline`] can hold a heterogeneous, ordered
//! list of them — the same erasure technique as
//! [`tasker_shared::registry::ErasedTaskDescriptor`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tasker_shared::error::HandlerError;
use tasker_shared::TaggedValue;
use uuid::Uuid;

use super::io::{StepInput, StepOutput};

#[async_trait]
pub trait PipelineStep: Send + Sync + std::fmt::Debug {
    /// Ordering key. Any totally ordered type works in the source
    /// system; this rewrite fixes `i64` since every teacher step
    /// ordering in the reference workspace is a small integer.
    fn order(&self) -> i64;

    /// Used only for the `"Started <name>"` activity log line.
    fn name(&self) -> &str;

    fn input_schema_ids(&self) -> Vec<&'static str>;
    fn output_schema_ids(&self) -> Vec<&'static str>;

    async fn run(&self, agent_id: Uuid, carry: Vec<TaggedValue>) -> Result<Vec<TaggedValue>, HandlerError>;
}

type StepHandlerFuture<R> = std::pin::Pin<Box<dyn Future<Output = Result<R, HandlerError>> + Send>>;
type StepHandlerFn<P, R> = Arc<dyn Fn(Uuid, P) -> StepHandlerFuture<R> + Send + Sync>;

pub struct TypedStep<P, R> {
    order: i64,
    name: String,
    handler: StepHandlerFn<P, R>,
    _marker: PhantomData<fn(P) -> R>,
}

impl<P, R> std::fmt::Debug for TypedStep<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedStep")
            .field("order", &self.order)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<P, R> TypedStep<P, R>
where
    P: StepInput,
    R: StepOutput,
{
    pub fn new<F, Fut>(order: i64, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Uuid, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        Self {
            order,
            name: name.into(),
            handler: Arc::new(move |agent_id, ctx| Box::pin(handler(agent_id, ctx))),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<P, R> PipelineStep for TypedStep<P, R>
where
    P: StepInput,
    R: StepOutput,
{
    fn order(&self) -> i64 {
        self.order
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input_schema_ids(&self) -> Vec<&'static str> {
        P::schema_ids()
    }

    fn output_schema_ids(&self) -> Vec<&'static str> {
        R::schema_ids()
    }

    async fn run(&self, agent_id: Uuid, carry: Vec<TaggedValue>) -> Result<Vec<TaggedValue>, HandlerError> {
        let input = P::from_carry(carry).map_err(|e| HandlerError::new(e.to_string()))?;
        let output = (self.handler)(agent_id, input).await?;
        output.into_carry().map_err(|e| HandlerError::new(e.to_string()))
    }
}
