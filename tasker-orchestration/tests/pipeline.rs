//! Pipeline engine scenarios that don't require a worker loop: type
//! flow validation and a direct two-step execution.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tasker_orchestration::{PipelineBuilder, StepOutput};
use tasker_shared::activity::{ActivityStore, InMemoryActivityStore};
use tasker_shared::error::{HandlerError, TaskerError};
use tasker_shared::Schema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Input {
    v: i64,
}
impl Schema for Input {
    const SCHEMA_ID: &'static str = "tests::pipeline::Input::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Doubled {
    v: i64,
}
impl Schema for Doubled {
    const SCHEMA_ID: &'static str = "tests::pipeline::Doubled::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stringified {
    s: String,
}
impl Schema for Stringified {
    const SCHEMA_ID: &'static str = "tests::pipeline::Stringified::v1";
}

#[tokio::test]
async fn s4_two_step_pipeline_produces_expected_result_and_progress_logs() {
    let pipeline = PipelineBuilder::new()
        .step(0, "double", |_agent_id: Uuid, input: Input| async move {
            Ok::<_, HandlerError>(Doubled { v: input.v * 2 })
        })
        .step(1, "stringify", |_agent_id: Uuid, doubled: Doubled| async move {
            Ok::<_, HandlerError>(Stringified {
                s: format!("={}", doubled.v),
            })
        })
        .build()
        .unwrap();

    let activity: Arc<dyn ActivityStore> = Arc::new(InMemoryActivityStore::new());
    let agent_id = activity.create("pipeline", None, "Queued", None).await.unwrap();

    let initial = Input { v: 5 }.into_carry().unwrap();
    let final_value = pipeline.execute(activity.as_ref(), agent_id, initial).await.unwrap();
    let result: Stringified = tasker_shared::untag(&final_value).unwrap();
    assert_eq!(result.s, "=10");

    let detail = activity.detail(agent_id, None).await.unwrap().unwrap();
    let started_logs: Vec<_> = detail
        .logs
        .iter()
        .filter(|log| log.message.starts_with("Started"))
        .collect();
    assert_eq!(started_logs.len(), 2);
    assert_eq!(started_logs[0].percentage, Some(0));
    assert_eq!(started_logs[1].percentage, Some(50));
}

#[tokio::test]
async fn type_flow_mismatch_is_rejected_at_build_time() {
    let result = PipelineBuilder::new()
        .step(0, "double", |_agent_id: Uuid, input: Input| async move {
            Ok::<_, HandlerError>(Doubled { v: input.v * 2 })
        })
        .step(1, "wrong-next", |_agent_id: Uuid, _s: Stringified| async move {
            Ok::<_, HandlerError>(Stringified { s: "x".to_string() })
        })
        .build();

    assert!(matches!(result, Err(TaskerError::PipelineTypeError(_))));
}

#[tokio::test]
async fn final_step_returning_a_tuple_is_rejected() {
    let result = PipelineBuilder::new()
        .step(0, "split", |_agent_id: Uuid, input: Input| async move {
            Ok::<_, HandlerError>((Doubled { v: input.v }, Stringified { s: "x".to_string() }))
        })
        .build();

    assert!(matches!(result, Err(TaskerError::PipelineTypeError(_))));
}

#[tokio::test]
async fn binding_to_mismatched_result_type_is_rejected() {
    let pipeline = PipelineBuilder::new()
        .step(0, "double", |_agent_id: Uuid, input: Input| async move {
            Ok::<_, HandlerError>(Doubled { v: input.v * 2 })
        })
        .build()
        .unwrap();

    let result = pipeline.bind::<Input, Stringified>("double_pipeline");
    assert!(matches!(result, Err(TaskerError::PipelineTypeError(_))));
}
