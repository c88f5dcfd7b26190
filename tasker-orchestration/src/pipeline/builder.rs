//! # Pipeline Builder & Runtime
//!
//! [`PipelineBuilder`] replaces the source system's class-based,
//! metaclass-bound pipeline DSL with an explicit builder: steps are
//! appended with an explicit `order` key, sorted, and the whole chain
//! is type-flow-validated once in [`PipelineBuilder::build`] before
//! any step ever runs.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use tasker_shared::activity::{ActivityStatus, ActivityStore};
use tasker_shared::error::{HandlerError, TaskerError, TaskerResult};
use tasker_shared::registry::{TaskDescriptor, TaskRegistry};
use tasker_shared::serialization::untag;
use tasker_shared::{Schema, TaggedValue};

use super::io::{StepInput, StepOutput};
use super::step::{PipelineStep, TypedStep};

/// Appends ordered steps and validates the chain once, at `build()`.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    steps: Vec<Arc<dyn PipelineStep>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. `order` is any `i64` — the builder sorts by it
    /// before validating, so steps may be declared out of order.
    pub fn step<P, R, F, Fut>(mut self, order: i64, name: impl Into<String>, handler: F) -> Self
    where
        P: StepInput,
        R: StepOutput,
        F: Fn(Uuid, P) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.steps.push(Arc::new(TypedStep::new(order, name, handler)));
        self
    }

    /// Sort by `order` and validate type flow between every adjacent
    /// pair: arity must match and each positional schema id must be
    /// identical. The final step's output must be a single
    /// schema id (a record, not a tuple) so it is serializable as the
    /// task's result.
    pub fn build(mut self) -> TaskerResult<Pipeline> {
        if self.steps.is_empty() {
            return Err(TaskerError::PipelineTypeError(
                "pipeline must have at least one step".to_string(),
            ));
        }

        self.steps.sort_by_key(|step| step.order());

        for pair in self.steps.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let produced = prev.output_schema_ids();
            let expected = next.input_schema_ids();
            if produced.len() != expected.len() {
                return Err(TaskerError::PipelineTypeError(format!(
                    "step '{}' produces {} value(s) but step '{}' expects {}",
                    prev.name(),
                    produced.len(),
                    next.name(),
                    expected.len()
                )));
            }
            if produced != expected {
                return Err(TaskerError::PipelineTypeError(format!(
                    "step '{}' output {:?} does not match step '{}' input {:?}",
                    prev.name(),
                    produced,
                    next.name(),
                    expected
                )));
            }
        }

        let last = self.steps.last().expect("checked non-empty above");
        if last.output_schema_ids().len() != 1 {
            return Err(TaskerError::PipelineTypeError(format!(
                "final step '{}' must return a single record type, not a {}-tuple",
                last.name(),
                last.output_schema_ids().len()
            )));
        }

        Ok(Pipeline {
            steps: Arc::new(self.steps),
        })
    }
}

/// A validated, ordered chain of steps. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Arc<Vec<Arc<dyn PipelineStep>>>,
}

impl Pipeline {
    fn input_schema_ids(&self) -> Vec<&'static str> {
        self.steps[0].input_schema_ids()
    }

    fn output_schema_id(&self) -> &'static str {
        self.steps
            .last()
            .expect("Pipeline is never empty once built")
            .output_schema_ids()[0]
    }

    /// Run every step in order, starting from `initial` (the task's
    /// context converted to a carry). Before each step, appends a
    /// `"Started <name>"` activity log at `percentage = floor(i/N*100)`.
    /// Returns the final carry's sole element.
    pub async fn execute(
        &self,
        activity: &dyn ActivityStore,
        agent_id: Uuid,
        initial: Vec<TaggedValue>,
    ) -> Result<TaggedValue, HandlerError> {
        let step_count = self.steps.len();
        let mut carry = initial;

        for (index, step) in self.steps.iter().enumerate() {
            let percentage = ((index * 100) / step_count) as u8;
            if let Err(err) = activity
                .append(
                    agent_id,
                    &format!("Started {}", step.name()),
                    ActivityStatus::Running,
                    Some(percentage),
                )
                .await
            {
                // A logging failure must not abort the pipeline run.
                warn!(%agent_id, step = step.name(), error = %err, "failed to append pipeline step log");
            }

            carry = step.run(agent_id, carry).await?;
        }

        carry
            .into_iter()
            .next()
            .ok_or_else(|| HandlerError::new("pipeline produced an empty carry"))
    }

    /// Bind this pipeline to a task's context/result types, validating
    /// that the first step accepts `C` and the last step returns `R`.
    /// `name` becomes the registered task name.
    pub fn bind<C, R>(self, name: impl Into<String>) -> TaskerResult<PipelineDescriptor<C, R>>
    where
        C: Schema,
        R: Schema,
    {
        let expected_input = vec![C::SCHEMA_ID];
        if self.input_schema_ids() != expected_input {
            return Err(TaskerError::PipelineTypeError(format!(
                "pipeline's first step expects {:?}, task context is '{}'",
                self.input_schema_ids(),
                C::SCHEMA_ID
            )));
        }
        if self.output_schema_id() != R::SCHEMA_ID {
            return Err(TaskerError::PipelineTypeError(format!(
                "pipeline's final step returns '{}', task result is '{}'",
                self.output_schema_id(),
                R::SCHEMA_ID
            )));
        }

        Ok(PipelineDescriptor {
            name: name.into(),
            pipeline: self,
            _marker: PhantomData,
        })
    }
}

/// A pipeline bound to a task's context (`C`) and result (`R`) types,
/// ready to become a [`TaskDescriptor`] and be registered with a
/// [`TaskRegistry`] — the Rust realization of a pipeline that acts
/// as an ordinary task handler.
pub struct PipelineDescriptor<C, R> {
    name: String,
    pipeline: Pipeline,
    _marker: PhantomData<fn(C) -> R>,
}

impl<C, R> PipelineDescriptor<C, R>
where
    C: Schema,
    R: Schema,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the `TaskDescriptor` that runs this pipeline when invoked
    /// through the normal worker/task machinery.
    pub fn into_task_descriptor(
        self,
        activity: Arc<dyn ActivityStore>,
    ) -> TaskerResult<TaskDescriptor<C, R>> {
        let pipeline = self.pipeline;
        TaskDescriptor::new(self.name, move |agent_id, ctx: C| {
            let pipeline = pipeline.clone();
            let activity = activity.clone();
            async move {
                let initial = ctx
                    .into_carry()
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                let final_value = pipeline.execute(activity.as_ref(), agent_id, initial).await?;
                untag::<R>(&final_value).map_err(|e| HandlerError::new(e.to_string()))
            }
        })
    }

    /// Convenience: build the task descriptor and register it in one
    /// call, under the name this pipeline was bound with.
    pub fn register(self, registry: &mut TaskRegistry, activity: Arc<dyn ActivityStore>) -> TaskerResult<()> {
        let descriptor = self.into_task_descriptor(activity)?;
        registry.register(descriptor);
        Ok(())
    }
}
