//! # Activity Store
//!
//! Relational record of every enqueued agent run: one header row per
//! `agent_id` plus an append-only log of status transitions. The
//! header carries no status of its own — the invariant is that an
//! activity's current status is the status of its *latest* log row
//! (ties broken by insertion order), computed everywhere via a
//! `row_number() over (partition by activity_id order by created_at
//! desc)` windowed subquery, grounded on
//! `original_source/src/agentexec/activity/models.py`'s
//! `_get_list_stmt`/`_get_pending_ids_stmt`/`_get_active_count_stmt`.

mod memory;
mod postgres;

pub use memory::InMemoryActivityStore;
pub use postgres::PostgresActivityStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use chrono::{DateTime, Utc};

/// One of the five statuses a log row (and therefore an activity) may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStatus {
    Queued,
    Running,
    Complete,
    Error,
    Canceled,
}

impl ActivityStatus {
    /// Stored/compared as lowercase text, matching the original schema's
    /// `Status` string enum values.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Queued => "queued",
            ActivityStatus::Running => "running",
            ActivityStatus::Complete => "complete",
            ActivityStatus::Error => "error",
            ActivityStatus::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(ActivityStatus::Queued),
            "running" => Some(ActivityStatus::Running),
            "complete" => Some(ActivityStatus::Complete),
            "error" => Some(ActivityStatus::Error),
            "canceled" => Some(ActivityStatus::Canceled),
            _ => None,
        }
    }

    /// Activities in these two statuses are "pending" — they count toward
    /// `count_active()` and are swept by `cancel_pending()`.
    pub fn is_active(&self) -> bool {
        matches!(self, ActivityStatus::Queued | ActivityStatus::Running)
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogRow {
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub status: ActivityStatus,
    pub percentage: Option<u8>,
}

/// A single row of `list()`'s paginated summary. This type never
/// carries `metadata` — the field does not exist on it at
/// all, so there is no accidental-serialization footgun.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityListItem {
    pub agent_id: Uuid,
    pub agent_type: Option<String>,
    pub latest_message: Option<String>,
    pub latest_status: Option<ActivityStatus>,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub latest_percentage: Option<u8>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityList {
    pub items: Vec<ActivityListItem>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Full detail for one activity: header fields plus every log row in
/// chronological order. Also never carries `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDetail {
    pub agent_id: Uuid,
    pub agent_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub logs: Vec<ActivityLogRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum ActivityStoreError {
    #[error("unknown agent: {0}")]
    UnknownAgent(Uuid),
    #[error("duplicate agent: {0}")]
    DuplicateAgent(Uuid),
    #[error("activity storage error: {0}")]
    Storage(String),
}

/// A conjunction of exact-match constraints over an activity's opaque
/// metadata map. Every key present must match the stored value;
/// missing keys mean no match.
pub type MetadataFilter = HashMap<String, String>;

pub(crate) fn metadata_matches(metadata: &HashMap<String, String>, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Allocate a header and its first Queued log row atomically. If
    /// `agent_id` is supplied and already has a header, fails with
    /// `DuplicateAgent`.
    async fn create(
        &self,
        task_name: &str,
        agent_id: Option<Uuid>,
        initial_message: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Uuid, ActivityStoreError>;

    /// Append one log row. Fails with `UnknownAgent` if no header exists.
    async fn append(
        &self,
        agent_id: Uuid,
        message: &str,
        status: ActivityStatus,
        percentage: Option<u8>,
    ) -> Result<(), ActivityStoreError>;

    /// Paginated summary, sorted active-first (Running before Queued),
    /// then inactive, each group by `started_at` descending (nulls last).
    async fn list(
        &self,
        page: u32,
        page_size: u32,
        metadata_filter: Option<&MetadataFilter>,
    ) -> Result<ActivityList, ActivityStoreError>;

    /// `None` both when the agent is unknown and when `metadata_filter`
    /// does not match — the two cases are indistinguishable by design.
    async fn detail(
        &self,
        agent_id: Uuid,
        metadata_filter: Option<&MetadataFilter>,
    ) -> Result<Option<ActivityDetail>, ActivityStoreError>;

    /// Count of activities whose latest status is Queued or Running.
    async fn count_active(&self) -> Result<i64, ActivityStoreError>;

    /// Append a Canceled row to every activity whose latest status is
    /// Queued or Running; returns how many were canceled.
    async fn cancel_pending(&self) -> Result<u64, ActivityStoreError>;
}
