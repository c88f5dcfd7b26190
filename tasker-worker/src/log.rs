//! # Log Fan-in
//!
//! Workers publish structured [`LogRecord`]s onto a fixed pub/sub
//! channel; a collector subscribes on behalf of the
//! controlling process and re-emits each record through `tracing`, the
//! way every teacher module logs rather than `println!` or the stdlib
//! `log` facade. Publication is fire-and-forget — a collector that
//! hasn't subscribed yet, or a dropped message, is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasker_shared::{BackendError, StateBackend, StateBackendKind};
use tracing::{debug, error, info, warn};

/// Channel every worker in a pool publishes its log records onto.
pub const LOG_CHANNEL: &str = "tasker:worker:logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log line emitted by a worker loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub worker_id: String,
    pub process_id: Option<u32>,
}

impl LogRecord {
    pub fn new(level: LogLevel, worker_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            worker_id: worker_id.into(),
            process_id: Some(std::process::id()),
        }
    }

    /// Publish this record onto [`LOG_CHANNEL`]. Errors are swallowed —
    /// a worker must never fail a task because logging is degraded.
    pub async fn publish(&self, backend: &StateBackendKind) {
        let Ok(bytes) = serde_json::to_vec(self) else {
            return;
        };
        if let Err(err) = backend.publish(LOG_CHANNEL, bytes).await {
            warn!(?err, "failed to publish worker log record");
        }
    }

    fn emit_locally(&self) {
        match self.level {
            LogLevel::Debug => debug!(worker_id = %self.worker_id, pid = ?self.process_id, "{}", self.message),
            LogLevel::Info => info!(worker_id = %self.worker_id, pid = ?self.process_id, "{}", self.message),
            LogLevel::Warn => warn!(worker_id = %self.worker_id, pid = ?self.process_id, "{}", self.message),
            LogLevel::Error => error!(worker_id = %self.worker_id, pid = ?self.process_id, "{}", self.message),
        }
    }
}

/// Subscribes to [`LOG_CHANNEL`] and re-emits every record it receives
/// through `tracing`, so the embedding binary's own subscriber picks it
/// up alongside its own log lines. Runs until its subscription stream
/// ends (the backend is dropped or the channel goes away) or it is
/// explicitly aborted by the pool on shutdown.
pub async fn run_log_collector(backend: StateBackendKind) -> Result<(), BackendError> {
    use futures::StreamExt;

    let mut stream = backend.subscribe(LOG_CHANNEL).await?;
    while let Some(item) = stream.next().await {
        let Ok(bytes) = item else {
            // Lagged or closed broadcast receiver: skip and keep listening.
            continue;
        };
        if let Ok(record) = serde_json::from_slice::<LogRecord>(&bytes) {
            record.emit_locally();
        }
    }
    Ok(())
}
