//! # Result Rendezvous
//!
//! Durable, TTL'd storage for a handler's return value under
//! `result:<agent_id>`. `wait_result` polls at a bounded interval
//! rather than blocking on a push notification, matching the source
//! system's polling design; `join` waits on many agent-ids in
//! parallel and fails the whole group if any one times out.

use std::marker::PhantomData;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::warn;
use uuid::Uuid;

use tasker_shared::{
    error::{TaskerError, TaskerResult},
    serialization::{tag, untag},
    Schema, StateBackend, StateBackendKind,
};

use crate::queue::EnqueuedTask;

fn result_key(agent_id: Uuid) -> String {
    format!("result:{agent_id}")
}

/// Durable result store plus poll-based wait primitives.
///
/// Nothing prevents `ttl < default wait timeout`, which would make
/// `wait_result` report `ResultTimeout`
/// even though the handler completed and the value simply expired
/// first. The constructor only warns — callers remain free to pass an
/// explicit `wait_result` timeout longer than `ttl`, a documented
/// footgun rather than a hard error.
#[derive(Debug, Clone)]
pub struct ResultRendezvous {
    backend: StateBackendKind,
    ttl: Duration,
    poll_interval: Duration,
}

impl ResultRendezvous {
    pub fn new(backend: StateBackendKind, ttl: Duration, default_wait_timeout: Duration) -> Self {
        debug_assert!(
            ttl >= default_wait_timeout,
            "result TTL ({ttl:?}) is shorter than the default wait timeout ({default_wait_timeout:?}); \
             a successful result can expire before a waiter ever observes it"
        );
        if ttl < default_wait_timeout {
            warn!(
                ?ttl,
                ?default_wait_timeout,
                "result TTL is shorter than the default wait timeout; \
                 wait_result may report ResultTimeout for tasks that actually completed"
            );
        }
        Self {
            backend,
            ttl,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// TTL applied to every stored result. Exposed so a worker can
    /// store an already-tagged, already-erased result under the same
    /// key convention without going through the typed [`Self::set_result`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Schema-tag, serialize, and store `value` under `result:<agent_id>`
    /// with the configured TTL. Idempotent last-writer-wins.
    pub async fn set_result<R: Schema>(&self, agent_id: Uuid, value: &R) -> TaskerResult<()> {
        let tagged = tag(value)?;
        let bytes = serde_json::to_vec(&tagged)
            .map_err(|e| TaskerError::SerializationError(e.to_string()))?;
        self.backend
            .set(&result_key(agent_id), bytes, Some(self.ttl))
            .await?;
        Ok(())
    }

    /// Poll `get(result:<id>)` at [`Self::poll_interval`] until a value
    /// appears or `timeout` elapses. A value of `null` is never stored
    /// by a well-behaved handler; if one is observed it is decoded
    /// like any other tagged value and returned as-is.
    pub async fn wait_result<R: Schema>(&self, agent_id: Uuid, timeout: Duration) -> TaskerResult<R> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(bytes) = self.backend.get(&result_key(agent_id)).await? {
                let tagged: tasker_shared::TaggedValue = serde_json::from_slice(&bytes)
                    .map_err(|e| TaskerError::SerializationError(e.to_string()))?;
                return Ok(untag(&tagged)?);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(TaskerError::ResultTimeout(agent_id));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        }
    }

    /// Await an [`EnqueuedTask`] handle directly.
    pub async fn wait<R: Schema>(&self, task: EnqueuedTask<R>, timeout: Duration) -> TaskerResult<R> {
        self.wait_result(task.agent_id, timeout).await
    }

    /// Wait for every agent-id in parallel, returning values in input
    /// order. A single `ResultTimeout` fails the whole join; results
    /// already ready for other ids are not cached back to the caller.
    pub async fn join<R: Schema>(
        &self,
        agent_ids: &[Uuid],
        timeout: Duration,
    ) -> TaskerResult<Vec<R>> {
        try_join_all(
            agent_ids
                .iter()
                .map(|agent_id| self.wait_result::<R>(*agent_id, timeout)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tasker_shared::backend::MemoryBackend;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sum {
        total: i64,
    }
    impl Schema for Sum {
        const SCHEMA_ID: &'static str = "tests::result::Sum::v1";
    }

    fn rendezvous() -> ResultRendezvous {
        ResultRendezvous::new(
            StateBackendKind::Memory(MemoryBackend::new()),
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
        .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn set_then_wait_round_trips_value() {
        let rendezvous = rendezvous();
        let agent_id = Uuid::new_v4();
        rendezvous
            .set_result(agent_id, &Sum { total: 42 })
            .await
            .unwrap();

        let value: Sum = rendezvous
            .wait_result(agent_id, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(value, Sum { total: 42 });
    }

    #[tokio::test]
    async fn wait_result_times_out_when_never_set() {
        let rendezvous = rendezvous();
        let agent_id = Uuid::new_v4();
        let result = rendezvous
            .wait_result::<Sum>(agent_id, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(TaskerError::ResultTimeout(_))));
    }

    #[tokio::test]
    async fn join_returns_values_in_input_order() {
        let rendezvous = rendezvous();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        rendezvous.set_result(b, &Sum { total: 2 }).await.unwrap();
        rendezvous.set_result(a, &Sum { total: 1 }).await.unwrap();

        let values: Vec<Sum> = rendezvous
            .join(&[a, b], Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(values, vec![Sum { total: 1 }, Sum { total: 2 }]);
    }

    #[tokio::test]
    async fn join_fails_whole_group_on_single_timeout() {
        let rendezvous = rendezvous();
        let a = Uuid::new_v4();
        let never = Uuid::new_v4();
        rendezvous.set_result(a, &Sum { total: 1 }).await.unwrap();

        let result = rendezvous
            .join::<Sum>(&[a, never], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(TaskerError::ResultTimeout(_))));
    }
}
