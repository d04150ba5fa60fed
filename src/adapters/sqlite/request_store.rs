//! SQLite implementation of the RequestStore.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CloseReason, MergeRequestStatus};
use crate::domain::ports::{RequestRecord, RequestStore, META_RETRY_COUNT};

/// Fields for a new merge request record.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub branch: String,
    pub target_branch: String,
    pub worker: String,
    pub source_issue: String,
    pub priority: u8,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct SqliteRequestStore {
    pool: SqlitePool,
}

impl SqliteRequestStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new open request and return its id.
    pub async fn submit(&self, request: NewRequest) -> DomainResult<String> {
        let id = format!("mr-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let now = Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&request.metadata)?;

        sqlx::query(
            r#"INSERT INTO merge_requests (id, branch, target_branch, worker, source_issue,
               priority, status, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&request.branch)
        .bind(&request.target_branch)
        .bind(&request.worker)
        .bind(&request.source_issue)
        .bind(i64::from(request.priority))
        .bind(MergeRequestStatus::Open.as_str())
        .bind(&metadata)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn current_state(&self, id: &str) -> DomainResult<(String, Option<String>)> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT status, close_reason FROM merge_requests WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or_else(|| DomainError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl RequestStore for SqliteRequestStore {
    async fn list_open_requests(&self) -> DomainResult<Vec<RequestRecord>> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT * FROM merge_requests WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(MergeRequestStatus::Open.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RequestRecord::try_from).collect()
    }

    async fn get_request(&self, id_or_branch: &str) -> DomainResult<Option<RequestRecord>> {
        let row: Option<RequestRow> = sqlx::query_as(
            r#"SELECT * FROM merge_requests WHERE id = ? OR branch = ?
               ORDER BY (id = ?) DESC, created_at DESC LIMIT 1"#,
        )
        .bind(id_or_branch)
        .bind(id_or_branch)
        .bind(id_or_branch)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RequestRecord::try_from).transpose()
    }

    async fn close(&self, id: &str, reason: &str) -> DomainResult<()> {
        let (status, _) = self.current_state(id).await?;
        if status == MergeRequestStatus::Closed.as_str() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE merge_requests SET status = ?, close_reason = ?, updated_at = ? WHERE id = ? AND status != ?",
        )
        .bind(MergeRequestStatus::Closed.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(MergeRequestStatus::Closed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reopen(&self, id: &str) -> DomainResult<()> {
        let (status, close_reason) = self.current_state(id).await?;
        if status == MergeRequestStatus::Closed.as_str() {
            return Err(DomainError::ClosedImmutable {
                id: id.to_string(),
                reason: close_reason
                    .as_deref()
                    .and_then(CloseReason::parse_store_text)
                    .unwrap_or(CloseReason::Merged),
            });
        }

        // A reopened request failed an attempt; count it toward the retry boost.
        let (metadata,): (String,) =
            sqlx::query_as("SELECT metadata FROM merge_requests WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        let mut metadata = parse_metadata(id, &metadata);
        let retries = metadata
            .get(META_RETRY_COUNT)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);
        metadata.insert(META_RETRY_COUNT.to_string(), (retries + 1).to_string());

        sqlx::query("UPDATE merge_requests SET status = ?, metadata = ?, updated_at = ? WHERE id = ?")
            .bind(MergeRequestStatus::Open.as_str())
            .bind(serde_json::to_string(&metadata)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Decode the metadata column; a malformed value reads as empty.
fn parse_metadata(id: &str, raw: &str) -> BTreeMap<String, String> {
    if raw.trim().is_empty() {
        return BTreeMap::new();
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(mr_id = id, error = %e, "ignoring malformed merge request metadata");
        BTreeMap::new()
    })
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: String,
    branch: String,
    target_branch: String,
    worker: String,
    source_issue: String,
    priority: i64,
    status: String,
    close_reason: Option<String>,
    metadata: String,
    created_at: String,
}

impl TryFrom<RequestRow> for RequestRecord {
    type Error = DomainError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = MergeRequestStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid status: {}", row.status))
        })?;
        let metadata = parse_metadata(&row.id, &row.metadata);
        let created_at = chrono::DateTime::parse_from_rfc3339(&row.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));

        Ok(RequestRecord {
            id: row.id,
            branch: row.branch,
            target_branch: row.target_branch,
            worker: row.worker,
            source_issue: row.source_issue,
            priority: u8::try_from(row.priority.clamp(0, 255)).unwrap_or(u8::MAX),
            status,
            close_reason: row.close_reason,
            created_at,
            metadata,
        })
    }
}
