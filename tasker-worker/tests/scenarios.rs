//! End-to-end scenarios driving a real `Queue` + `WorkerPool` +
//! `ResultRendezvous` against `MemoryBackend`, covering the task
//! lifecycle, handler failure isolation, and priority ordering.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tasker_orchestration::{EnqueuedTask, PipelineBuilder, Queue, ResultRendezvous};
use tasker_shared::activity::{ActivityStatus, ActivityStore, InMemoryActivityStore};
use tasker_shared::backend::{MemoryBackend, Priority};
use tasker_shared::config::{ActivityMessagesConfig, WorkerConfig};
use tasker_shared::error::{HandlerError, TaskerError};
use tasker_shared::registry::TaskDescriptor;
use tasker_shared::{Schema, StateBackendKind};
use tasker_worker::WorkerPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EchoCtx {
    msg: String,
}
impl Schema for EchoCtx {
    const SCHEMA_ID: &'static str = "tests::scenarios::EchoCtx::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EchoResult {
    msg: String,
}
impl Schema for EchoResult {
    const SCHEMA_ID: &'static str = "tests::scenarios::EchoResult::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FailCtx {
    value: i64,
}
impl Schema for FailCtx {
    const SCHEMA_ID: &'static str = "tests::scenarios::FailCtx::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FailResult {
    value: i64,
}
impl Schema for FailResult {
    const SCHEMA_ID: &'static str = "tests::scenarios::FailResult::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PriorityCtx {
    value: i64,
}
impl Schema for PriorityCtx {
    const SCHEMA_ID: &'static str = "tests::scenarios::PriorityCtx::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PriorityResult {
    value: i64,
}
impl Schema for PriorityResult {
    const SCHEMA_ID: &'static str = "tests::scenarios::PriorityResult::v1";
}

fn worker_config(count: usize) -> WorkerConfig {
    WorkerConfig {
        worker_count: count,
        graceful_shutdown_timeout_secs: 1,
        poll_timeout_ms: 20,
    }
}

/// S1 — a handler that succeeds: Queued -> Running -> Complete, the
/// caller's `wait_result` returns the handler's value, and the final
/// log row reports 100%.
#[tokio::test]
async fn s1_simple_task_completes_and_result_is_retrievable() {
    let backend = StateBackendKind::Memory(MemoryBackend::new());
    let activity: Arc<dyn ActivityStore> = Arc::new(InMemoryActivityStore::new());
    let rendezvous = Arc::new(ResultRendezvous::new(
        backend.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    ));

    let mut registry = tasker_shared::registry::TaskRegistry::new();
    registry.register(
        TaskDescriptor::<EchoCtx, EchoResult>::new("echo", |_id, ctx| async move {
            Ok::<_, HandlerError>(EchoResult { msg: ctx.msg })
        })
        .unwrap(),
    );
    let registry = Arc::new(registry);

    let queue = Queue::new(
        backend.clone(),
        activity.clone(),
        registry.clone(),
        "s1-tasks",
        ActivityMessagesConfig::default(),
    );

    let pool = WorkerPool::builder(
        backend.clone(),
        activity.clone(),
        rendezvous.clone(),
        "s1-tasks",
        &worker_config(1),
        ActivityMessagesConfig::default(),
    )
    .task(
        TaskDescriptor::<EchoCtx, EchoResult>::new("echo", |_id, ctx| async move {
            Ok::<_, HandlerError>(EchoResult { msg: ctx.msg })
        })
        .unwrap(),
    )
    .build();
    pool.start().await.unwrap();

    let enqueued: EnqueuedTask<EchoResult> = queue
        .enqueue(
            "echo",
            EchoCtx {
                msg: "hi".to_string(),
            },
            Priority::Low,
            None,
        )
        .await
        .unwrap();

    let result = rendezvous
        .wait(enqueued, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(
        result,
        EchoResult {
            msg: "hi".to_string()
        }
    );

    pool.shutdown(Duration::from_millis(200)).await.unwrap();
}

/// S2 — a handler that always errors: Queued -> Running -> Error,
/// `wait_result` reports `ResultTimeout`, nothing stays active, and
/// the same worker keeps serving later tasks.
#[tokio::test]
async fn s2_handler_failure_is_isolated_and_worker_keeps_running() {
    let backend = StateBackendKind::Memory(MemoryBackend::new());
    let activity: Arc<dyn ActivityStore> = Arc::new(InMemoryActivityStore::new());
    let rendezvous = Arc::new(ResultRendezvous::new(
        backend.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    ));

    let mut registry = tasker_shared::registry::TaskRegistry::new();
    registry.register(
        TaskDescriptor::<FailCtx, FailResult>::new("always_fails", |_id, _ctx| async move {
            Err::<FailResult, _>(HandlerError::new("boom"))
        })
        .unwrap(),
    );
    let registry = Arc::new(registry);

    let queue = Queue::new(
        backend.clone(),
        activity.clone(),
        registry.clone(),
        "s2-tasks",
        ActivityMessagesConfig::default(),
    );

    let pool = WorkerPool::builder(
        backend.clone(),
        activity.clone(),
        rendezvous.clone(),
        "s2-tasks",
        &worker_config(1),
        ActivityMessagesConfig::default(),
    )
    .task(
        TaskDescriptor::<FailCtx, FailResult>::new("always_fails", |_id, _ctx| async move {
            Err::<FailResult, _>(HandlerError::new("boom"))
        })
        .unwrap(),
    )
    .build();
    pool.start().await.unwrap();

    let enqueued: EnqueuedTask<FailResult> = queue
        .enqueue("always_fails", FailCtx { value: 1 }, Priority::Low, None)
        .await
        .unwrap();

    let result = rendezvous
        .wait(enqueued, Duration::from_millis(500))
        .await;
    assert!(matches!(result, Err(TaskerError::ResultTimeout(_))));
    assert_eq!(activity.count_active().await.unwrap(), 0);

    // The same worker is still alive: a second task on the same queue
    // still completes.
    let enqueued_fail_again: EnqueuedTask<FailResult> = queue
        .enqueue("always_fails", FailCtx { value: 2 }, Priority::Low, None)
        .await
        .unwrap();
    let result = rendezvous
        .wait(enqueued_fail_again, Duration::from_millis(500))
        .await;
    assert!(matches!(result, Err(TaskerError::ResultTimeout(_))));
    assert_eq!(activity.count_active().await.unwrap(), 0);

    pool.shutdown(Duration::from_millis(200)).await.unwrap();
}

/// S3 — with exactly one worker, a high-priority task enqueued after a
/// low-priority one is still processed first.
#[tokio::test]
async fn s3_high_priority_is_processed_before_older_low_priority() {
    let backend = StateBackendKind::Memory(MemoryBackend::new());
    let activity: Arc<dyn ActivityStore> = Arc::new(InMemoryActivityStore::new());
    let rendezvous = Arc::new(ResultRendezvous::new(
        backend.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    ));

    let mut registry = tasker_shared::registry::TaskRegistry::new();
    registry.register(
        TaskDescriptor::<PriorityCtx, PriorityResult>::new("priority_echo", |_id, ctx| async move {
            // Hold the single worker just long enough that both
            // enqueues land before either is dequeued.
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, HandlerError>(PriorityResult { value: ctx.value })
        })
        .unwrap(),
    );
    let registry = Arc::new(registry);

    let queue = Queue::new(
        backend.clone(),
        activity.clone(),
        registry.clone(),
        "s3-tasks",
        ActivityMessagesConfig::default(),
    );

    let pool = WorkerPool::builder(
        backend.clone(),
        activity.clone(),
        rendezvous.clone(),
        "s3-tasks",
        &worker_config(1),
        ActivityMessagesConfig::default(),
    )
    .task(
        TaskDescriptor::<PriorityCtx, PriorityResult>::new("priority_echo", |_id, ctx| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, HandlerError>(PriorityResult { value: ctx.value })
        })
        .unwrap(),
    )
    .build();
    pool.start().await.unwrap();

    let low: EnqueuedTask<PriorityResult> = queue
        .enqueue("priority_echo", PriorityCtx { value: 1 }, Priority::Low, None)
        .await
        .unwrap();
    // Give the worker a moment to have claimed `low` and be sleeping
    // inside the handler, so `high` is genuinely the only item in the
    // list when it's pushed to the front.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let high: EnqueuedTask<PriorityResult> = queue
        .enqueue("priority_echo", PriorityCtx { value: 2 }, Priority::High, None)
        .await
        .unwrap();

    let high_result = rendezvous
        .wait(high, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(high_result.value, 2);

    // `started_at` is the earliest log row's timestamp, i.e. enqueue
    // time — low is older there by construction. What this scenario
    // actually cares about is dequeue order, observable as which
    // activity's Running row lands first.
    let low_running_at = first_running_timestamp(&activity, low.agent_id).await;
    let high_running_at = first_running_timestamp(&activity, high.agent_id).await;
    assert!(high_running_at < low_running_at);

    pool.shutdown(Duration::from_millis(500)).await.unwrap();
}

async fn first_running_timestamp(
    activity: &Arc<dyn ActivityStore>,
    agent_id: Uuid,
) -> chrono::DateTime<chrono::Utc> {
    activity
        .detail(agent_id, None)
        .await
        .unwrap()
        .unwrap()
        .logs
        .iter()
        .find(|row| row.status == ActivityStatus::Running)
        .unwrap()
        .created_at
}

/// S6 — enqueue work, then shut the pool down with no grace period:
/// pending activities end up Canceled, and `cancel_pending` reports
/// at least one.
#[tokio::test]
async fn s6_graceful_shutdown_cancels_pending_activities() {
    let backend = StateBackendKind::Memory(MemoryBackend::new());
    let activity: Arc<dyn ActivityStore> = Arc::new(InMemoryActivityStore::new());
    let rendezvous = Arc::new(ResultRendezvous::new(
        backend.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    ));

    // No workers spawned: every enqueued task stays Queued, exactly
    // what S6 needs to observe a pending sweep deterministically.
    let pool = WorkerPool::builder(
        backend.clone(),
        activity.clone(),
        rendezvous,
        "s6-tasks",
        &worker_config(0),
        ActivityMessagesConfig::default(),
    )
    .build();
    pool.start().await.unwrap();

    for _ in 0..3 {
        activity
            .create("noop", Some(Uuid::new_v4()), "Queued", None)
            .await
            .unwrap();
    }

    let canceled = pool.shutdown(Duration::from_secs(0)).await.unwrap();
    assert!(canceled >= 1);
    assert_eq!(activity.count_active().await.unwrap(), 0);

    // Idempotent: a second cancel-pending sweep finds nothing left.
    assert_eq!(activity.cancel_pending().await.unwrap(), 0);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SubEchoCtx {
    value: i64,
}
impl Schema for SubEchoCtx {
    const SCHEMA_ID: &'static str = "tests::scenarios::SubEchoCtx::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SubEchoResult {
    value: i64,
}
impl Schema for SubEchoResult {
    const SCHEMA_ID: &'static str = "tests::scenarios::SubEchoResult::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FanOutInput {
    a: i64,
    b: i64,
}
impl Schema for FanOutInput {
    const SCHEMA_ID: &'static str = "tests::scenarios::FanOutInput::v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FanOutResult {
    concatenated: String,
}
impl Schema for FanOutResult {
    const SCHEMA_ID: &'static str = "tests::scenarios::FanOutResult::v1";
}

/// S5 — a pipeline step enqueues two sub-tasks, joins them, and hands
/// their results (in enqueue order) to the next step as a pair; the
/// pipeline plus its two children total 3 Complete activities.
#[tokio::test]
async fn s5_fan_out_join_feeds_next_step_a_pair_in_enqueue_order() {
    let backend = StateBackendKind::Memory(MemoryBackend::new());
    let activity: Arc<dyn ActivityStore> = Arc::new(InMemoryActivityStore::new());
    let rendezvous = Arc::new(ResultRendezvous::new(
        backend.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    ));

    // The fan-out step only ever enqueues `sub_echo`, so it gets its own
    // queue bound to a registry containing just that descriptor — no
    // chicken-and-egg with the pipeline descriptor, which is built from
    // this same closure below and only registered into the pool's
    // registry afterwards.
    let mut sub_registry = tasker_shared::registry::TaskRegistry::new();
    sub_registry.register(
        TaskDescriptor::<SubEchoCtx, SubEchoResult>::new("sub_echo", |_id, ctx| async move {
            Ok::<_, HandlerError>(SubEchoResult { value: ctx.value })
        })
        .unwrap(),
    );
    let inner_queue = Queue::new(
        backend.clone(),
        activity.clone(),
        Arc::new(sub_registry),
        "s5-tasks",
        ActivityMessagesConfig::default(),
    );

    let pipeline = PipelineBuilder::new()
        .step(0, "fan_out", {
            let queue = inner_queue.clone();
            let rendezvous = rendezvous.clone();
            move |_agent_id: Uuid, input: FanOutInput| {
                let queue = queue.clone();
                let rendezvous = rendezvous.clone();
                async move {
                    let a: EnqueuedTask<SubEchoResult> = queue
                        .enqueue("sub_echo", SubEchoCtx { value: input.a }, Priority::Low, None)
                        .await
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    let b: EnqueuedTask<SubEchoResult> = queue
                        .enqueue("sub_echo", SubEchoCtx { value: input.b }, Priority::Low, None)
                        .await
                        .map_err(|e| HandlerError::new(e.to_string()))?;

                    let results: Vec<SubEchoResult> = rendezvous
                        .join(&[a.agent_id, b.agent_id], Duration::from_secs(2))
                        .await
                        .map_err(|e| HandlerError::new(e.to_string()))?;

                    Ok::<_, HandlerError>((results[0].clone(), results[1].clone()))
                }
            }
        })
        .step(
            1,
            "concatenate",
            |_agent_id: Uuid, pair: (SubEchoResult, SubEchoResult)| async move {
                Ok::<_, HandlerError>(FanOutResult {
                    concatenated: format!("{}-{}", pair.0.value, pair.1.value),
                })
            },
        )
        .build()
        .unwrap();

    let pipeline_descriptor = pipeline
        .bind::<FanOutInput, FanOutResult>("fan_out_pipeline")
        .unwrap()
        .into_task_descriptor(activity.clone())
        .unwrap();

    let pool = WorkerPool::builder(
        backend.clone(),
        activity.clone(),
        rendezvous.clone(),
        "s5-tasks",
        // Enough workers that the pipeline task (blocked inside `join`)
        // doesn't starve the two sub-tasks it depends on.
        &worker_config(3),
        ActivityMessagesConfig::default(),
    )
    .task(pipeline_descriptor)
    .task(
        TaskDescriptor::<SubEchoCtx, SubEchoResult>::new("sub_echo", |_id, ctx| async move {
            Ok::<_, HandlerError>(SubEchoResult { value: ctx.value })
        })
        .unwrap(),
    )
    .build();

    let queue = Queue::new(
        backend.clone(),
        activity.clone(),
        pool.registry(),
        "s5-tasks",
        ActivityMessagesConfig::default(),
    );

    pool.start().await.unwrap();

    let enqueued: EnqueuedTask<FanOutResult> = queue
        .enqueue("fan_out_pipeline", FanOutInput { a: 1, b: 2 }, Priority::Low, None)
        .await
        .unwrap();

    let result = rendezvous
        .wait(enqueued, Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(result.concatenated, "1-2");

    let list = activity.list(1, 50, None).await.unwrap();
    assert_eq!(list.total, 3);
    assert!(list
        .items
        .iter()
        .all(|item| item.latest_status == Some(ActivityStatus::Complete)));

    pool.shutdown(Duration::from_millis(200)).await.unwrap();
}
