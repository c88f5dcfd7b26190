//! # Postgres State Backend
//!
//! Production implementation of [`StateBackend`] backed by a single
//! Postgres database, shared across worker processes. The list
//! primitive claims rows with `SELECT ... FOR UPDATE SKIP LOCKED` so
//! concurrent workers never observe the same row twice; pub/sub rides
//! Postgres `LISTEN`/`NOTIFY`,
//! grounded on the connect/listen/disconnect lifecycle exercised in
//! `tasker-pgmq`'s `PgmqNotifyListener` integration tests.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::resilience::{CircuitBreaker, CircuitBreakerBehavior, CircuitBreakerConfig};

use super::{BackendError, StateBackend};

const BROADCAST_CAPACITY: usize = 1024;
/// Upper bound on how long a single claim-attempt poll sleeps before
/// retrying when no `NOTIFY` wakes it early.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    table_prefix: String,
    channels: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    /// Shields every query this backend issues from cascading failure
    /// when Postgres itself is degraded: a run of failures trips the
    /// circuit and subsequent calls fail fast with `Unavailable`
    /// instead of queuing up behind a dying connection pool.
    breaker: Arc<CircuitBreaker>,
}

impl PostgresBackend {
    /// Connect and ensure the backing tables exist. `table_prefix` is
    /// prepended to `queue_item`/`kv` (e.g. `"tasker_"` yields
    /// `tasker_queue_item`), so one database can host multiple
    /// independent queues behind distinct prefixes.
    pub async fn connect(database_url: &str, table_prefix: &str) -> Result<Self, BackendError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let backend = Self {
            pool,
            table_prefix: table_prefix.to_string(),
            channels: Arc::new(DashMap::new()),
            breaker: Arc::new(CircuitBreaker::new("postgres-backend", CircuitBreakerConfig::default())),
        };
        backend.ensure_schema().await?;
        Ok(backend)
    }

    pub fn from_pool(pool: PgPool, table_prefix: &str) -> Self {
        Self {
            pool,
            table_prefix: table_prefix.to_string(),
            channels: Arc::new(DashMap::new()),
            breaker: Arc::new(CircuitBreaker::new("postgres-backend", CircuitBreakerConfig::default())),
        }
    }

    /// Run one backend operation behind the circuit breaker: fails fast
    /// with `Unavailable` while the circuit is open, otherwise records
    /// the call's outcome and latency.
    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        if !self.breaker.should_allow() {
            return Err(BackendError::Unavailable(format!(
                "circuit breaker open for {}",
                self.breaker.name()
            )));
        }
        let start = Instant::now();
        let result = op().await;
        match &result {
            Ok(_) => self.breaker.record_success(start.elapsed()),
            Err(_) => self.breaker.record_failure(start.elapsed()),
        }
        result
    }

    fn queue_table(&self) -> String {
        format!("{}queue_item", self.table_prefix)
    }

    fn kv_table(&self) -> String {
        format!("{}kv", self.table_prefix)
    }

    /// Derive a valid Postgres `NOTIFY` channel name for a list name.
    fn notify_channel(&self, list: &str) -> String {
        format!("{}q_{}", self.table_prefix, list.replace(['-', ' '], "_"))
    }

    async fn ensure_schema(&self) -> Result<(), BackendError> {
        let queue_table = self.queue_table();
        let kv_table = self.kv_table();

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {queue_table} (
                id BIGSERIAL PRIMARY KEY,
                list_name TEXT NOT NULL,
                priority SMALLINT NOT NULL,
                payload BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{queue_table}_claim
             ON {queue_table} (list_name, priority, id)"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {kv_table} (
                key TEXT PRIMARY KEY,
                value BYTEA NOT NULL,
                expires_at TIMESTAMPTZ
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn notify(&self, channel: &str) -> Result<(), BackendError> {
        sqlx::query("SELECT pg_notify($1, '')")
            .bind(channel)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn try_claim(&self, list: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let queue_table = self.queue_table();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let row = sqlx::query(&format!(
            "SELECT id, payload FROM {queue_table}
             WHERE list_name = $1
             ORDER BY priority ASC, id ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1"
        ))
        .bind(list)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let payload: Vec<u8> = row
            .try_get("payload")
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        sqlx::query(&format!("DELETE FROM {queue_table} WHERE id = $1"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Some(payload))
    }

    async fn push(&self, list: &str, item: Vec<u8>, priority: i16) -> Result<(), BackendError> {
        let queue_table = self.queue_table();
        self.guarded(|| async {
            sqlx::query(&format!(
                "INSERT INTO {queue_table} (list_name, priority, payload) VALUES ($1, $2, $3)"
            ))
            .bind(list)
            .bind(priority)
            .bind(item)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

            self.notify(&self.notify_channel(list)).await
        })
        .await
    }
}

#[async_trait]
impl StateBackend for PostgresBackend {
    async fn push_front(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError> {
        self.push(list, item, 0).await
    }

    async fn push_back(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError> {
        self.push(list, item, 1).await
    }

    async fn blocking_pop_tail(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let deadline = Instant::now() + timeout;
        let channel = self.notify_channel(list);

        loop {
            if let Some(item) = self.guarded(|| self.try_claim(list)).await? {
                return Ok(Some(item));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let mut listener = PgListener::connect_with(&self.pool)
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            listener
                .listen(&channel)
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;

            let wait = remaining.min(POLL_INTERVAL);
            tokio::select! {
                _ = listener.recv() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let kv_table = self.kv_table();
        let row = self
            .guarded(|| async {
                sqlx::query(&format!(
                    "SELECT value, expires_at FROM {kv_table} WHERE key = $1"
                ))
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: Option<chrono::DateTime<chrono::Utc>> = row
            .try_get("expires_at")
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if let Some(expires_at) = expires_at {
            if chrono::Utc::now() >= expires_at {
                self.delete(key).await?;
                return Ok(None);
            }
        }

        let value: Vec<u8> = row
            .try_get("value")
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Some(value))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        let kv_table = self.kv_table();
        let expires_at = ttl.map(|d| {
            chrono::Utc::now() + chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
        });

        self.guarded(|| async {
            sqlx::query(&format!(
                "INSERT INTO {kv_table} (key, value, expires_at) VALUES ($1, $2, $3)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at"
            ))
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let kv_table = self.kv_table();
        self.guarded(|| async {
            sqlx::query(&format!("DELETE FROM {kv_table} WHERE key = $1"))
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn publish(&self, channel: &str, message: Vec<u8>) -> Result<(), BackendError> {
        self.guarded(|| async {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&message);
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(channel)
                .bind(encoded)
                .execute(&self.pool)
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn subscribe(&self, channel: &str) -> Result<BroadcastStream<Vec<u8>>, BackendError> {
        // First subscriber to a channel spawns a dedicated listener task
        // that owns its own connection and forwards every NOTIFY payload
        // on that channel into the broadcast sender; later subscribers
        // just tap the same sender.
        let is_new_channel = !self.channels.contains_key(channel);
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .value()
            .clone();

        if is_new_channel {
            let mut pump = PgListener::connect_with(&self.pool)
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            pump.listen(channel)
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;

            let forward_to = sender.clone();
            tokio::spawn(async move {
                while let Ok(notification) = pump.recv().await {
                    use base64::Engine;
                    if let Ok(decoded) =
                        base64::engine::general_purpose::STANDARD.decode(notification.payload())
                    {
                        let _ = forward_to.send(decoded);
                    }
                }
            });
        }

        Ok(BroadcastStream::new(sender.subscribe()))
    }
}
