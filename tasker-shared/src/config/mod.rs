//! # Configuration
//!
//! Layered TOML + environment configuration built on the `config`
//! crate: a base file merged with environment variables prefixed
//! `TASKER_`, so every option may be overridden without editing the
//! file on disk.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Queue naming and table-prefix configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name of the backend list used as the primary task queue.
    #[serde(default = "QueueConfig::default_queue_name")]
    pub queue_name: String,
    /// Prefix applied to the `activity`/`activity_log` table names.
    #[serde(default = "QueueConfig::default_table_prefix")]
    pub table_prefix: String,
}

impl QueueConfig {
    fn default_queue_name() -> String {
        "tasker_tasks".to_string()
    }

    fn default_table_prefix() -> String {
        "tasker_".to_string()
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: Self::default_queue_name(),
            table_prefix: Self::default_table_prefix(),
        }
    }
}

/// Worker pool sizing and shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "WorkerConfig::default_worker_count")]
    pub worker_count: usize,
    /// Seconds workers are given to finish their current task before
    /// being forcefully terminated on `shutdown`.
    #[serde(default = "WorkerConfig::default_shutdown_timeout_secs")]
    pub graceful_shutdown_timeout_secs: u64,
    /// Timeout used for each `blocking_pop_tail` poll inside the
    /// worker loop (not the shutdown timeout).
    #[serde(default = "WorkerConfig::default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl WorkerConfig {
    fn default_worker_count() -> usize {
        4
    }

    fn default_shutdown_timeout_secs() -> u64 {
        30
    }

    fn default_poll_timeout_ms() -> u64 {
        1_000
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: Self::default_worker_count(),
            graceful_shutdown_timeout_secs: Self::default_shutdown_timeout_secs(),
            poll_timeout_ms: Self::default_poll_timeout_ms(),
        }
    }
}

/// Default activity log messages. `error_template` supports a
/// `{error}` substitution token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityMessagesConfig {
    #[serde(default = "ActivityMessagesConfig::default_queued")]
    pub queued: String,
    #[serde(default = "ActivityMessagesConfig::default_complete")]
    pub complete: String,
    #[serde(default = "ActivityMessagesConfig::default_error_template")]
    pub error_template: String,
}

impl ActivityMessagesConfig {
    fn default_queued() -> String {
        "Queued".to_string()
    }

    fn default_complete() -> String {
        "Complete".to_string()
    }

    fn default_error_template() -> String {
        "Error: {error}".to_string()
    }

    pub fn render_error(&self, error: &str) -> String {
        self.error_template.replace("{error}", error)
    }
}

impl Default for ActivityMessagesConfig {
    fn default() -> Self {
        Self {
            queued: Self::default_queued(),
            complete: Self::default_complete(),
            error_template: Self::default_error_template(),
        }
    }
}

/// Result rendezvous TTL and default poll/wait parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultConfig {
    #[serde(default = "ResultConfig::default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "ResultConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ResultConfig {
    fn default_ttl_secs() -> u64 {
        3_600
    }

    fn default_poll_interval_ms() -> u64 {
        500
    }
}

impl Default for ResultConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Self::default_ttl_secs(),
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

/// State backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Connection string for the Postgres-backed implementation.
    /// Unused when the embedding binary constructs a `MemoryBackend`
    /// directly (e.g. in tests).
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "BackendConfig::default_pool_size")]
    pub pool_size: u32,
}

impl BackendConfig {
    fn default_pool_size() -> u32 {
        10
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_size: Self::default_pool_size(),
        }
    }
}

/// Root configuration object for the task-execution substrate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskerCoreConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub activity: ActivityMessagesConfig,
    #[serde(default)]
    pub result: ResultConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl TaskerCoreConfig {
    /// Load defaults, then an optional TOML file, then `TASKER_*`
    /// environment variable overrides (`TASKER_WORKER__WORKER_COUNT=8`,
    /// etc.) — reloadable only at process start.
    ///
    /// The section/field separator is `__` (not `_`): a single `_`
    /// would be ambiguous with the underscores already inside field
    /// names like `worker_count`, since `config`'s `Environment` source
    /// splits the whole remainder after the prefix on every separator
    /// occurrence with no way to tell "field name" underscores apart
    /// from "nesting" ones.
    pub fn load(toml_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&TaskerCoreConfig::default())?);

        if let Some(path) = toml_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKER")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
