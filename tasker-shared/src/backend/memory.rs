//! # In-Memory State Backend
//!
//! Single-process reference implementation of [`StateBackend`]. Exists
//! for tests and for embedding the whole substrate in one process; it
//! has no cross-process visibility, so it cannot back a multi-worker
//! deployment where workers are separate OS processes (see
//! [`super::postgres::PostgresBackend`] for that).
//!
//! Two internal FIFO queues per list (`high`/`low`) implement the
//! priority ordering contract directly rather than relying on deque-end
//! tricks: a `push_front` call always appends to the `high` queue's
//! tail and a pop always drains `high` before `low`, which gives both
//! "high before low regardless of enqueue order" and "FIFO within a
//! priority class" for free.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio_stream::wrappers::BroadcastStream;

use super::{BackendError, StateBackend};

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct ListQueues {
    high: VecDeque<Vec<u8>>,
    low: VecDeque<Vec<u8>>,
}

#[derive(Debug)]
struct ListState {
    queues: Mutex<ListQueues>,
    notify: Notify,
}

impl Default for ListState {
    fn default() -> Self {
        Self {
            queues: Mutex::new(ListQueues::default()),
            notify: Notify::new(),
        }
    }
}

#[derive(Debug)]
struct KvEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory implementation of the queue/KV/pub-sub capability set.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    lists: Arc<DashMap<String, Arc<ListState>>>,
    kv: Arc<DashMap<String, KvEntry>>,
    channels: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            lists: Arc::new(DashMap::new()),
            kv: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
        }
    }

    fn list(&self, name: &str) -> Arc<ListState> {
        self.lists
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .value()
            .clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn push_front(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError> {
        let state = self.list(list);
        state.queues.lock().await.high.push_back(item);
        state.notify.notify_one();
        Ok(())
    }

    async fn push_back(&self, list: &str, item: Vec<u8>) -> Result<(), BackendError> {
        let state = self.list(list);
        state.queues.lock().await.low.push_back(item);
        state.notify.notify_one();
        Ok(())
    }

    async fn blocking_pop_tail(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let state = self.list(list);
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut queues = state.queues.lock().await;
                if let Some(item) = queues.high.pop_front().or_else(|| queues.low.pop_front()) {
                    return Ok(Some(item));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            tokio::select! {
                _ = state.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        if let Some(entry) = self.kv.get(key) {
            if let Some(expires_at) = entry.expires_at {
                if Instant::now() >= expires_at {
                    drop(entry);
                    self.kv.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.kv
            .insert(key.to_string(), KvEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.kv.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: Vec<u8>) -> Result<(), BackendError> {
        // Fire-and-forget: no receivers is not an error.
        let _ = self.channel(channel).send(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BroadcastStream<Vec<u8>>, BackendError> {
        let receiver = self.channel(channel).subscribe();
        Ok(BroadcastStream::new(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn fifo_within_priority_class() {
        let backend = MemoryBackend::new();
        backend.push_back("q", b"low-1".to_vec()).await.unwrap();
        backend.push_back("q", b"low-2".to_vec()).await.unwrap();

        let first = backend
            .blocking_pop_tail("q", Duration::from_millis(50))
            .await
            .unwrap();
        let second = backend
            .blocking_pop_tail("q", Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(first, Some(b"low-1".to_vec()));
        assert_eq!(second, Some(b"low-2".to_vec()));
    }

    #[tokio::test]
    async fn high_priority_precedes_older_low_priority() {
        let backend = MemoryBackend::new();
        backend.push_back("q", b"low".to_vec()).await.unwrap();
        backend.push_front("q", b"high".to_vec()).await.unwrap();

        let first = backend
            .blocking_pop_tail("q", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(first, Some(b"high".to_vec()));
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_list() {
        let backend = MemoryBackend::new();
        let result = backend
            .blocking_pop_tail("empty", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn kv_roundtrip_and_ttl_expiry() {
        let backend = MemoryBackend::new();
        backend
            .set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pubsub_delivers_to_subscriber() {
        let backend = MemoryBackend::new();
        let mut stream = backend.subscribe("events").await.unwrap();
        backend.publish("events", b"hello".to_vec()).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn pop_is_delivered_to_exactly_one_consumer() {
        let backend = Arc::new(MemoryBackend::new());
        backend.push_back("q", b"only-item".to_vec()).await.unwrap();

        let b1 = backend.clone();
        let b2 = backend.clone();
        let (r1, r2) = tokio::join!(
            b1.blocking_pop_tail("q", Duration::from_millis(50)),
            b2.blocking_pop_tail("q", Duration::from_millis(50))
        );

        let results = [r1.unwrap(), r2.unwrap()];
        let delivered = results.iter().filter(|r| r.is_some()).count();
        assert_eq!(delivered, 1);
    }
}
