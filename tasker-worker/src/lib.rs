//! # tasker-worker
//!
//! The process that actually runs handlers: a single [`worker::Worker`]
//! loop, the [`pool::WorkerPool`] that supervises N of them sharing one
//! registry and backend, and the [`log`] fan-in that re-emits every
//! worker's structured log records through `tracing` in the controlling
//! process.

pub mod log;
pub mod pool;
pub mod worker;

pub use log::{LogLevel, LogRecord, LOG_CHANNEL};
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use worker::{Worker, WorkerBootConfig};
