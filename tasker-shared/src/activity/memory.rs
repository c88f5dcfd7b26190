//! In-memory `ActivityStore`, grounded on the same list/filter/status
//! semantics as the Postgres implementation but expressed as plain
//! collection scans — acceptable since it exists only for tests and
//! single-process development, never production.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    metadata_matches, ActivityDetail, ActivityList, ActivityListItem, ActivityLogRow,
    ActivityStatus, ActivityStore, ActivityStoreError, MetadataFilter,
};

struct Record {
    agent_type: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    metadata: HashMap<String, String>,
    logs: Vec<ActivityLogRow>,
}

impl Record {
    fn latest(&self) -> Option<&ActivityLogRow> {
        // Ties on created_at break by insertion order: the vec is
        // append-only, so the last element with the max timestamp wins.
        self.logs
            .iter()
            .enumerate()
            .max_by_key(|(idx, row)| (row.created_at, *idx))
            .map(|(_, row)| row)
    }

    fn started_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.logs.iter().map(|row| row.created_at).min()
    }
}

#[derive(Default)]
pub struct InMemoryActivityStore {
    records: Mutex<HashMap<Uuid, Record>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryActivityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryActivityStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn create(
        &self,
        task_name: &str,
        agent_id: Option<Uuid>,
        initial_message: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Uuid, ActivityStoreError> {
        let agent_id = agent_id.unwrap_or_else(Uuid::new_v4);
        let mut records = self.records.lock().await;

        if records.contains_key(&agent_id) {
            return Err(ActivityStoreError::DuplicateAgent(agent_id));
        }

        let now = Utc::now();
        records.insert(
            agent_id,
            Record {
                agent_type: Some(task_name.to_string()),
                created_at: now,
                updated_at: now,
                metadata: metadata.unwrap_or_default(),
                logs: vec![ActivityLogRow {
                    created_at: now,
                    message: initial_message.to_string(),
                    status: ActivityStatus::Queued,
                    percentage: Some(0),
                }],
            },
        );

        Ok(agent_id)
    }

    async fn append(
        &self,
        agent_id: Uuid,
        message: &str,
        status: ActivityStatus,
        percentage: Option<u8>,
    ) -> Result<(), ActivityStoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&agent_id)
            .ok_or(ActivityStoreError::UnknownAgent(agent_id))?;

        record.updated_at = Utc::now();
        record.logs.push(ActivityLogRow {
            created_at: record.updated_at,
            message: message.to_string(),
            status,
            percentage,
        });

        Ok(())
    }

    async fn list(
        &self,
        page: u32,
        page_size: u32,
        metadata_filter: Option<&MetadataFilter>,
    ) -> Result<ActivityList, ActivityStoreError> {
        let records = self.records.lock().await;

        let mut matching: Vec<(&Uuid, &Record)> = records
            .iter()
            .filter(|(_, record)| {
                metadata_filter
                    .map(|filter| metadata_matches(&record.metadata, filter))
                    .unwrap_or(true)
            })
            .collect();

        let total = matching.len() as i64;

        // active-first (Running before Queued), then inactive, each group
        // by started_at descending with nulls last.
        matching.sort_by(|(_, a), (_, b)| {
            let priority = |record: &Record| match record.latest().map(|log| log.status) {
                Some(ActivityStatus::Running) => 0,
                Some(ActivityStatus::Queued) => 1,
                _ => 2,
            };
            priority(a).cmp(&priority(b)).then_with(|| {
                match (a.started_at(), b.started_at()) {
                    (Some(a_ts), Some(b_ts)) => b_ts.cmp(&a_ts),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            })
        });

        let offset = (page.saturating_sub(1) as usize) * page_size as usize;
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .map(|(agent_id, record)| {
                let latest = record.latest();
                ActivityListItem {
                    agent_id: *agent_id,
                    agent_type: record.agent_type.clone(),
                    latest_message: latest.map(|log| log.message.clone()),
                    latest_status: latest.map(|log| log.status),
                    latest_timestamp: latest.map(|log| log.created_at),
                    latest_percentage: latest.and_then(|log| log.percentage),
                    started_at: record.started_at(),
                }
            })
            .collect();

        Ok(ActivityList {
            items,
            total,
            page,
            page_size,
        })
    }

    async fn detail(
        &self,
        agent_id: Uuid,
        metadata_filter: Option<&MetadataFilter>,
    ) -> Result<Option<ActivityDetail>, ActivityStoreError> {
        let records = self.records.lock().await;
        let Some(record) = records.get(&agent_id) else {
            return Ok(None);
        };

        if let Some(filter) = metadata_filter {
            if !metadata_matches(&record.metadata, filter) {
                return Ok(None);
            }
        }

        Ok(Some(ActivityDetail {
            agent_id,
            agent_type: record.agent_type.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            logs: record.logs.clone(),
        }))
    }

    async fn count_active(&self) -> Result<i64, ActivityStoreError> {
        let records = self.records.lock().await;
        let count = records
            .values()
            .filter(|record| {
                record
                    .latest()
                    .map(|log| log.status.is_active())
                    .unwrap_or(false)
            })
            .count();
        Ok(count as i64)
    }

    async fn cancel_pending(&self) -> Result<u64, ActivityStoreError> {
        let mut records = self.records.lock().await;
        let mut canceled = 0u64;

        for record in records.values_mut() {
            let is_pending = record
                .latest()
                .map(|log| log.status.is_active())
                .unwrap_or(false);
            if is_pending {
                let now = Utc::now();
                record.updated_at = now;
                record.logs.push(ActivityLogRow {
                    created_at: now,
                    message: "Canceled due to shutdown".to_string(),
                    status: ActivityStatus::Canceled,
                    percentage: None,
                });
                canceled += 1;
            }
        }

        Ok(canceled)
    }
}
