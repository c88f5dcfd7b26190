//! # Worker
//!
//! A single worker: binds to a queue, loops on blocking pop, hydrates
//! the popped envelope through the registry, and runs `Task::execute`.
//! Per-task failures are caught and recorded as a terminal Error log;
//! they never escape the loop. A `BackendUnavailable` is the one
//! error that does — it is fatal for this worker only.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};
use uuid::Uuid;

use tasker_shared::activity::{ActivityStatus, ActivityStore};
use tasker_shared::config::ActivityMessagesConfig;
use tasker_shared::error::{TaskerError, TaskerResult};
use tasker_shared::registry::TaskRegistry;
use tasker_shared::{BackendError, StateBackend, StateBackendKind, TaskEnvelope};

use tasker_orchestration::ResultRendezvous;

use crate::log::{LogLevel, LogRecord};

/// Parameters a worker needs to run its loop. Kept as a plain struct
/// (rather than threading each field separately) so a future
/// out-of-process worker binary could deserialize the same shape from
/// an env var or CLI flag — see SPEC_FULL §4.7.
#[derive(Debug, Clone)]
pub struct WorkerBootConfig {
    pub worker_id: String,
    pub queue_name: String,
    pub shutdown_flag_key: String,
    pub poll_timeout: Duration,
}

/// One worker: a queue name, a registry, and the backends it needs to
/// hydrate, run, and record a task.
#[derive(Clone)]
pub struct Worker {
    boot: WorkerBootConfig,
    backend: StateBackendKind,
    activity: Arc<dyn ActivityStore>,
    registry: Arc<TaskRegistry>,
    rendezvous: Arc<ResultRendezvous>,
    messages: ActivityMessagesConfig,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.boot.worker_id)
            .field("queue_name", &self.boot.queue_name)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(
        boot: WorkerBootConfig,
        backend: StateBackendKind,
        activity: Arc<dyn ActivityStore>,
        registry: Arc<TaskRegistry>,
        rendezvous: Arc<ResultRendezvous>,
        messages: ActivityMessagesConfig,
    ) -> Self {
        Self {
            boot,
            backend,
            activity,
            registry,
            rendezvous,
            messages,
        }
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        LogRecord::new(level, &self.boot.worker_id, message)
            .publish(&self.backend)
            .await;
    }

    async fn shutdown_requested(&self) -> Result<bool, BackendError> {
        Ok(matches!(
            self.backend.get(&self.boot.shutdown_flag_key).await?,
            Some(bytes) if bytes == b"true"
        ))
    }

    /// Drain the queue until the shutdown flag is observed set or a
    /// `BackendUnavailable` error terminates the loop. There is no
    /// per-task session-bind step here — it has no analogue once
    /// everything runs in one process (see DESIGN.md).
    pub async fn run(&self) -> TaskerResult<()> {
        self.log(LogLevel::Info, "worker started").await;

        loop {
            if self.shutdown_requested().await? {
                break;
            }

            let popped = self
                .backend
                .blocking_pop_tail(&self.boot.queue_name, self.boot.poll_timeout)
                .await?;

            let Some(bytes) = popped else {
                continue;
            };

            self.process_envelope(bytes).await;
        }

        self.log(LogLevel::Info, "worker stopped").await;
        Ok(())
    }

    async fn process_envelope(&self, bytes: Vec<u8>) {
        let envelope: TaskEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                // No agent-id to log against: the whole envelope is
                // unreadable. Acceptable data loss — we can only log
                // it locally.
                warn!(error = %err, "dropped undecodable envelope");
                self.log(
                    LogLevel::Error,
                    format!("dropped undecodable envelope: {err}"),
                )
                .await;
                return;
            }
        };

        let hydrated = match self.registry.hydrate(&envelope) {
            Ok(hydrated) => hydrated,
            Err(err) => {
                self.record_error(envelope.agent_id, &err).await;
                return;
            }
        };

        debug!(agent_id = %hydrated.agent_id, task = %hydrated.task_name, "dequeued task");
        self.execute(hydrated.agent_id, hydrated.task_name, hydrated.run).await;
    }

    /// `Task::execute`: append Running, invoke the handler (catching
    /// both `Err` returns and panics), and record a terminal log plus
    /// the result on success. Never propagates a handler failure.
    async fn execute(
        &self,
        agent_id: Uuid,
        task_name: String,
        run: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<tasker_shared::TaggedValue, tasker_shared::HandlerError>> + Send>,
        >,
    ) {
        if let Err(err) = self
            .activity
            .append(agent_id, "Running", ActivityStatus::Running, Some(0))
            .await
        {
            warn!(%agent_id, error = %err, "failed to append Running log");
        }

        let outcome = AssertUnwindSafe(run).catch_unwind().await;

        match outcome {
            Ok(Ok(tagged_result)) => {
                if let Err(err) = self.store_and_complete(agent_id, tagged_result).await {
                    self.record_error(agent_id, &err).await;
                    return;
                }
                self.log(
                    LogLevel::Info,
                    format!("task '{task_name}' ({agent_id}) completed"),
                )
                .await;
            }
            Ok(Err(handler_error)) => {
                self.record_error(agent_id, &TaskerError::from(handler_error)).await;
            }
            Err(panic) => {
                let message = panic_message(&panic);
                self.record_error(agent_id, &TaskerError::HandlerError(message)).await;
            }
        }
    }

    async fn store_and_complete(
        &self,
        agent_id: Uuid,
        tagged_result: tasker_shared::TaggedValue,
    ) -> TaskerResult<()> {
        let bytes = serde_json::to_vec(&tagged_result)
            .map_err(|e| TaskerError::SerializationError(e.to_string()))?;
        self.backend
            .set(
                &format!("result:{agent_id}"),
                bytes,
                Some(self.rendezvous_ttl()),
            )
            .await?;
        self.activity
            .append(agent_id, &self.messages.complete, ActivityStatus::Complete, Some(100))
            .await?;
        Ok(())
    }

    fn rendezvous_ttl(&self) -> Duration {
        self.rendezvous.ttl()
    }

    async fn record_error(&self, agent_id: Uuid, err: &TaskerError) {
        let message = self.messages.render_error(&err.to_string());
        if let Err(append_err) = self
            .activity
            .append(agent_id, &message, ActivityStatus::Error, None)
            .await
        {
            warn!(%agent_id, error = %append_err, "failed to append Error log");
        }
        self.log(LogLevel::Error, format!("task {agent_id} failed: {err}")).await;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
