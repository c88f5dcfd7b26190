//! # State Backend
//!
//! The pluggable capability set every other component is built on: a
//! FIFO list with priority push and blocking pop, a key-value store
//! with TTL, and a publish/subscribe channel.
//!
//! Two concrete implementations exist: [`memory::MemoryBackend`] for
//! tests and single-process deployments, and [`postgres::PostgresBackend`]
//! for production, using a `SELECT ... FOR UPDATE SKIP LOCKED` claim
//! pattern for the list and `LISTEN`/`NOTIFY` for pub/sub.
//!
//! Enum dispatch instead of `Arc<dyn Trait>` avoids vtable overhead on
//! the hot dequeue path: the two implementations are wrapped in
//! [`StateBackendKind`] rather than exposed as trait objects. The
//! [`StateBackend`] trait still exists so tests (and the in-memory
//! backend itself) can be written generically.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryBackend;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

/// Priority class for enqueue. High priority pushes to the front of
/// the list; Low pushes to the back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Low,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("no such channel: {0}")]
    NoSuchChannel(String),
}

/// Capability set implemented by every state backend.
///
/// `blocking_pop_tail` is the only operation permitted to suspend for
/// longer than a single round-trip; it must return `Ok(None)` rather
/// than hang forever once `timeout` elapses.
#[async_trait]
pub trait StateBackend: Send + Sync + std::fmt::Debug {
    async fn push_front(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError>;
    async fn push_back(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError>;

    /// Atomically claim one item from the tail of `list`, waiting up to
    /// `timeout` for one to appear. At-most-one consumer observes a
    /// given item.
    async fn blocking_pop_tail(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError>;
    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    async fn publish(&self, channel: &str, message: Vec<u8>) -> Result<(), BackendError>;

    /// Subscribe to `channel`, returning a stream of raw messages.
    /// Publication is fire-and-forget: a subscriber that is slow or
    /// absent simply misses messages published before it subscribed.
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<tokio_stream::wrappers::BroadcastStream<Vec<u8>>, BackendError>;
}

/// Enum-dispatch wrapper over the concrete backend implementations.
#[derive(Debug, Clone)]
pub enum StateBackendKind {
    Memory(MemoryBackend),
    #[cfg(feature = "postgres")]
    Postgres(PostgresBackend),
}

impl StateBackendKind {
    pub fn new_in_memory() -> Self {
        Self::Memory(MemoryBackend::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "in_memory",
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => "postgres",
        }
    }
}

#[async_trait]
impl StateBackend for StateBackendKind {
    async fn push_front(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.push_front(list, item).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.push_front(list, item).await,
        }
    }

    async fn push_back(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.push_back(list, item).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.push_back(list, item).await,
        }
    }

    async fn blocking_pop_tail(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        match self {
            Self::Memory(b) => b.blocking_pop_tail(list, timeout).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.blocking_pop_tail(list, timeout).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        match self {
            Self::Memory(b) => b.get(key).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.get(key).await,
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.set(key, value, ttl).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.delete(key).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.delete(key).await,
        }
    }

    async fn publish(&self, channel: &str, message: Vec<u8>) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.publish(channel, message).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.publish(channel, message).await,
        }
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<tokio_stream::wrappers::BroadcastStream<Vec<u8>>, BackendError> {
        match self {
            Self::Memory(b) => b.subscribe(channel).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.subscribe(channel).await,
        }
    }
}
