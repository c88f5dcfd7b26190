//! # Worker Pool
//!
//! Supervises N [`Worker`]s sharing one registry and backend (spec
//! §4.7): `start()` clears the shutdown flag and spawns the workers,
//! `run()` additionally drives the log collector until interrupted,
//! and `shutdown(timeout)` sets the flag, waits for workers to drain,
//! aborts stragglers, and sweeps every still-pending activity.
//!
//! Registration happens through [`WorkerPoolBuilder::task`] before
//! `build()` — post-build registration has no effect on already
//! spawned workers, matching [`TaskRegistry`]'s own "safe to mutate
//! only before spawn" contract.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tasker_shared::activity::ActivityStore;
use tasker_shared::config::{ActivityMessagesConfig, WorkerConfig};
use tasker_shared::error::{TaskerError, TaskerResult};
use tasker_shared::registry::{TaskDescriptor, TaskRegistry};
use tasker_shared::serialization::Schema;
use tasker_shared::{StateBackend, StateBackendKind};

use tasker_orchestration::ResultRendezvous;

use crate::log::run_log_collector;
use crate::worker::{Worker, WorkerBootConfig};

fn shutdown_flag_key(queue_name: &str) -> String {
    format!("{queue_name}:shutdown")
}

/// Accumulates task registrations before a pool is spawned.
pub struct WorkerPoolBuilder {
    backend: StateBackendKind,
    activity: Arc<dyn ActivityStore>,
    rendezvous: Arc<ResultRendezvous>,
    queue_name: String,
    worker_count: usize,
    poll_timeout: Duration,
    shutdown_timeout: Duration,
    messages: ActivityMessagesConfig,
    registry: TaskRegistry,
}

impl WorkerPoolBuilder {
    pub fn new(
        backend: StateBackendKind,
        activity: Arc<dyn ActivityStore>,
        rendezvous: Arc<ResultRendezvous>,
        queue_name: impl Into<String>,
        worker_config: &WorkerConfig,
        messages: ActivityMessagesConfig,
    ) -> Self {
        Self {
            backend,
            activity,
            rendezvous,
            queue_name: queue_name.into(),
            worker_count: worker_config.worker_count,
            poll_timeout: Duration::from_millis(worker_config.poll_timeout_ms),
            shutdown_timeout: Duration::from_secs(worker_config.graceful_shutdown_timeout_secs),
            messages,
            registry: TaskRegistry::new(),
        }
    }

    /// Register a handler. Must be called before [`Self::build`]; a
    /// pool has no API to add handlers once its workers are running.
    pub fn task<C, R>(mut self, descriptor: TaskDescriptor<C, R>) -> Self
    where
        C: Schema,
        R: Schema,
    {
        self.registry.register(descriptor);
        self
    }

    pub fn build(self) -> WorkerPool {
        let shutdown_flag_key = shutdown_flag_key(&self.queue_name);
        WorkerPool {
            backend: self.backend,
            activity: self.activity,
            registry: Arc::new(self.registry),
            rendezvous: self.rendezvous,
            queue_name: self.queue_name,
            worker_count: self.worker_count,
            poll_timeout: self.poll_timeout,
            shutdown_timeout: self.shutdown_timeout,
            messages: self.messages,
            shutdown_flag_key,
            handles: Mutex::new(Vec::new()),
            log_collector: Mutex::new(None),
        }
    }
}

pub struct WorkerPool {
    backend: StateBackendKind,
    activity: Arc<dyn ActivityStore>,
    registry: Arc<TaskRegistry>,
    rendezvous: Arc<ResultRendezvous>,
    queue_name: String,
    worker_count: usize,
    poll_timeout: Duration,
    shutdown_timeout: Duration,
    messages: ActivityMessagesConfig,
    shutdown_flag_key: String,
    handles: Mutex<Vec<JoinHandle<()>>>,
    log_collector: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue_name", &self.queue_name)
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn builder(
        backend: StateBackendKind,
        activity: Arc<dyn ActivityStore>,
        rendezvous: Arc<ResultRendezvous>,
        queue_name: impl Into<String>,
        worker_config: &WorkerConfig,
        messages: ActivityMessagesConfig,
    ) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(backend, activity, rendezvous, queue_name, worker_config, messages)
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    /// Clear the shutdown flag and spawn `worker_count` workers. Returns
    /// once every worker task has been spawned, not once they exit.
    pub async fn start(&self) -> TaskerResult<()> {
        self.backend.delete(&self.shutdown_flag_key).await?;

        let mut handles = self.handles.lock().await;
        for index in 0..self.worker_count {
            let worker = Worker::new(
                WorkerBootConfig {
                    worker_id: format!("{}-{index}", self.queue_name),
                    queue_name: self.queue_name.clone(),
                    shutdown_flag_key: self.shutdown_flag_key.clone(),
                    poll_timeout: self.poll_timeout,
                },
                self.backend.clone(),
                self.activity.clone(),
                self.registry.clone(),
                self.rendezvous.clone(),
                self.messages.clone(),
            );

            handles.push(tokio::spawn(async move {
                if let Err(err) = worker.run().await {
                    warn!(error = %err, "worker exited with a fatal error");
                }
            }));
        }

        info!(worker_count = self.worker_count, queue = %self.queue_name, "worker pool started");
        Ok(())
    }

    /// `start()`, then the log collector, running until the process
    /// receives an interrupt signal, then `shutdown(graceful timeout)`.
    pub async fn run(&self) -> TaskerResult<u64> {
        self.start().await?;

        let collector_backend = self.backend.clone();
        let collector = tokio::spawn(async move {
            if let Err(err) = run_log_collector(collector_backend).await {
                warn!(error = %err, "log collector stopped");
            }
        });
        *self.log_collector.lock().await = Some(collector);

        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for shutdown signal");
        }

        self.shutdown(self.shutdown_timeout).await
    }

    /// Set the shutdown flag, wait up to `timeout` for each worker to
    /// exit on its own, abort survivors, stop the log collector, and
    /// sweep every still-pending activity to Canceled.
    pub async fn shutdown(&self, timeout: Duration) -> TaskerResult<u64> {
        self.backend
            .set(&self.shutdown_flag_key, b"true".to_vec(), None)
            .await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut handles = self.handles.lock().await;
        for mut handle in handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::select! {
                res = &mut handle => {
                    if let Err(join_err) = res {
                        warn!(error = %join_err, "worker task ended abnormally");
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    warn!("worker did not exit within the graceful shutdown timeout; aborting");
                    handle.abort();
                }
            }
        }

        if let Some(collector) = self.log_collector.lock().await.take() {
            collector.abort();
        }

        let canceled = self
            .activity
            .cancel_pending()
            .await
            .map_err(TaskerError::from)?;
        info!(canceled, "worker pool shut down");
        Ok(canceled)
    }
}
