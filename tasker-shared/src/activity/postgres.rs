//! Postgres-backed `ActivityStore`. The latest-log-wins invariant is
//! computed with a windowed subquery (`row_number() over (partition by
//! activity_id order by created_at desc)`),
//! grounded on `original_source/src/agentexec/activity/models.py`'s
//! `_get_list_stmt` / `_get_pending_ids_stmt` / `_get_active_count_stmt`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, QueryBuilder, Row};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    ActivityDetail, ActivityList, ActivityListItem, ActivityLogRow, ActivityStatus, ActivityStore,
    ActivityStoreError, MetadataFilter,
};

#[derive(Debug, Clone)]
pub struct PostgresActivityStore {
    pool: PgPool,
    table_prefix: String,
}

impl PostgresActivityStore {
    pub async fn connect(
        database_url: &str,
        table_prefix: &str,
    ) -> Result<Self, ActivityStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;
        let store = Self::from_pool(pool, table_prefix);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool, table_prefix: &str) -> Self {
        Self {
            pool,
            table_prefix: table_prefix.to_string(),
        }
    }

    fn activity_table(&self) -> String {
        format!("{}activity", self.table_prefix)
    }

    fn log_table(&self) -> String {
        format!("{}activity_log", self.table_prefix)
    }

    async fn ensure_schema(&self) -> Result<(), ActivityStoreError> {
        let activity_table = self.activity_table();
        let log_table = self.log_table();

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {activity_table} (
                agent_id UUID PRIMARY KEY,
                agent_type TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {log_table} (
                id BIGSERIAL PRIMARY KEY,
                activity_id UUID NOT NULL REFERENCES {activity_table} (agent_id),
                message TEXT NOT NULL,
                status TEXT NOT NULL,
                percentage SMALLINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{log_table}_activity
             ON {log_table} (activity_id, created_at DESC, id DESC)"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        Ok(())
    }

    fn latest_log_cte(&self) -> String {
        let log_table = self.log_table();
        format!(
            "(SELECT activity_id, message, status, percentage, created_at,
                     row_number() OVER (
                         PARTITION BY activity_id ORDER BY created_at DESC, id DESC
                     ) AS rn
              FROM {log_table})"
        )
    }

    fn started_at_cte(&self) -> String {
        let log_table = self.log_table();
        format!(
            "(SELECT activity_id, min(created_at) AS started_at FROM {log_table} GROUP BY activity_id)"
        )
    }

    fn push_metadata_filter<'a>(
        builder: &mut QueryBuilder<'a, sqlx::Postgres>,
        filter: Option<&'a MetadataFilter>,
    ) {
        let Some(filter) = filter else {
            return;
        };
        for (key, value) in filter {
            builder.push(" AND a.metadata ->> ");
            builder.push_bind(key.clone());
            builder.push(" = ");
            builder.push_bind(value.clone());
        }
    }
}

#[async_trait]
impl ActivityStore for PostgresActivityStore {
    async fn create(
        &self,
        task_name: &str,
        agent_id: Option<Uuid>,
        initial_message: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Uuid, ActivityStoreError> {
        let agent_id = agent_id.unwrap_or_else(Uuid::new_v4);
        let activity_table = self.activity_table();
        let log_table = self.log_table();
        let metadata_json: JsonValue = metadata
            .map(|map| serde_json::to_value(map).unwrap_or(JsonValue::Null))
            .unwrap_or_else(|| JsonValue::Object(Default::default()));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO {activity_table} (agent_id, agent_type, metadata)
             VALUES ($1, $2, $3)
             ON CONFLICT (agent_id) DO NOTHING"
        ))
        .bind(agent_id)
        .bind(task_name)
        .bind(metadata_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;
            return Err(ActivityStoreError::DuplicateAgent(agent_id));
        }

        sqlx::query(&format!(
            "INSERT INTO {log_table} (activity_id, message, status, percentage)
             VALUES ($1, $2, $3, $4)"
        ))
        .bind(agent_id)
        .bind(initial_message)
        .bind(ActivityStatus::Queued.as_str())
        .bind(0i16)
        .execute(&mut *tx)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        Ok(agent_id)
    }

    async fn append(
        &self,
        agent_id: Uuid,
        message: &str,
        status: ActivityStatus,
        percentage: Option<u8>,
    ) -> Result<(), ActivityStoreError> {
        let activity_table = self.activity_table();
        let log_table = self.log_table();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        let exists: Option<(Uuid,)> =
            sqlx::query_as(&format!("SELECT agent_id FROM {activity_table} WHERE agent_id = $1"))
                .bind(agent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        if exists.is_none() {
            tx.rollback()
                .await
                .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;
            return Err(ActivityStoreError::UnknownAgent(agent_id));
        }

        sqlx::query(&format!(
            "INSERT INTO {log_table} (activity_id, message, status, percentage)
             VALUES ($1, $2, $3, $4)"
        ))
        .bind(agent_id)
        .bind(message)
        .bind(status.as_str())
        .bind(percentage.map(|p| p as i16))
        .execute(&mut *tx)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        sqlx::query(&format!(
            "UPDATE {activity_table} SET updated_at = now() WHERE agent_id = $1"
        ))
        .bind(agent_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn list(
        &self,
        page: u32,
        page_size: u32,
        metadata_filter: Option<&MetadataFilter>,
    ) -> Result<ActivityList, ActivityStoreError> {
        let activity_table = self.activity_table();
        let latest_log = self.latest_log_cte();
        let started_at = self.started_at_cte();

        let mut count_builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT count(*) FROM {activity_table} a WHERE 1 = 1"
        ));
        Self::push_metadata_filter(&mut count_builder, metadata_filter);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        let offset = (page.saturating_sub(1) as i64) * page_size as i64;

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT a.agent_id, a.agent_type,
                    l.message AS latest_message, l.status AS latest_status,
                    l.created_at AS latest_timestamp, l.percentage AS latest_percentage,
                    s.started_at
             FROM {activity_table} a
             LEFT JOIN {latest_log} l ON l.activity_id = a.agent_id AND l.rn = 1
             LEFT JOIN {started_at} s ON s.activity_id = a.agent_id
             WHERE 1 = 1"
        ));
        Self::push_metadata_filter(&mut builder, metadata_filter);
        builder.push(
            " ORDER BY
                CASE WHEN l.status IN ('running', 'queued') THEN 0 ELSE 1 END,
                CASE l.status WHEN 'running' THEN 1 WHEN 'queued' THEN 2 ELSE 3 END,
                s.started_at DESC NULLS LAST
              OFFSET ",
        );
        builder.push_bind(offset);
        builder.push(" LIMIT ");
        builder.push_bind(page_size as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| {
                let status_text: Option<String> = row.try_get("latest_status").ok();
                ActivityListItem {
                    agent_id: row.get("agent_id"),
                    agent_type: row.get("agent_type"),
                    latest_message: row.try_get("latest_message").ok(),
                    latest_status: status_text.and_then(|s| ActivityStatus::parse(&s)),
                    latest_timestamp: row.try_get("latest_timestamp").ok(),
                    latest_percentage: row
                        .try_get::<Option<i16>, _>("latest_percentage")
                        .ok()
                        .flatten()
                        .map(|p| p as u8),
                    started_at: row.try_get("started_at").ok(),
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
        let activity_table = self.activity_table();
        let log_table = self.log_table();

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT agent_id, agent_type, created_at, updated_at
             FROM {activity_table} a
             WHERE agent_id = "
        ));
        builder.push_bind(agent_id);
        Self::push_metadata_filter(&mut builder, metadata_filter);

        let header = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        let Some(header) = header else {
            return Ok(None);
        };

        let log_rows = sqlx::query(&format!(
            "SELECT message, status, percentage, created_at
             FROM {log_table}
             WHERE activity_id = $1
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        let logs = log_rows
            .into_iter()
            .map(|row| {
                let status_text: String = row.get("status");
                ActivityLogRow {
                    created_at: row.get("created_at"),
                    message: row.get("message"),
                    status: ActivityStatus::parse(&status_text)
                        .unwrap_or(ActivityStatus::Queued),
                    percentage: row
                        .try_get::<Option<i16>, _>("percentage")
                        .ok()
                        .flatten()
                        .map(|p| p as u8),
                }
            })
            .collect();

        Ok(Some(ActivityDetail {
            agent_id: header.get("agent_id"),
            agent_type: header.get("agent_type"),
            created_at: header.get::<DateTime<Utc>, _>("created_at"),
            updated_at: header.get::<DateTime<Utc>, _>("updated_at"),
            logs,
        }))
    }

    async fn count_active(&self) -> Result<i64, ActivityStoreError> {
        let latest_log = self.latest_log_cte();
        let activity_table = self.activity_table();

        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT count(*) FROM {activity_table} a
             JOIN {latest_log} l ON l.activity_id = a.agent_id AND l.rn = 1
             WHERE l.status IN ('queued', 'running')"
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        Ok(count)
    }

    async fn cancel_pending(&self) -> Result<u64, ActivityStoreError> {
        let latest_log = self.latest_log_cte();
        let activity_table = self.activity_table();
        let log_table = self.log_table();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        let pending_ids: Vec<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT a.agent_id FROM {activity_table} a
             JOIN {latest_log} l ON l.activity_id = a.agent_id AND l.rn = 1
             WHERE l.status IN ('queued', 'running')"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        for (agent_id,) in &pending_ids {
            sqlx::query(&format!(
                "INSERT INTO {log_table} (activity_id, message, status, percentage)
                 VALUES ($1, $2, $3, NULL)"
            ))
            .bind(agent_id)
            .bind("Canceled due to shutdown")
            .bind(ActivityStatus::Canceled.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ActivityStoreError::Storage(e.to_string()))?;

        Ok(pending_ids.len() as u64)
    }
}
