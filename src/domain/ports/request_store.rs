use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::{CloseReason, MergeRequest, MergeRequestStatus};

/// Metadata key holding the number of previous integration attempts
pub const META_RETRY_COUNT: &str = "retry_count";
/// Metadata key holding the parent convoy identifier
pub const META_CONVOY_ID: &str = "convoy_id";
/// Metadata key holding the parent convoy creation time (RFC 3339)
pub const META_CONVOY_CREATED_AT: &str = "convoy_created_at";

/// A merge-request record as held by the request store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub branch: String,
    /// Empty when the submitter did not name one
    pub target_branch: String,
    pub worker: String,
    pub source_issue: String,
    /// Priority tier, 0 (most urgent) to 4
    pub priority: u8,
    pub status: MergeRequestStatus,
    /// Close text as stored, e.g. `"rejected: stale"`
    pub close_reason: Option<String>,
    /// `None` when the stored timestamp could not be parsed
    pub created_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl RequestRecord {
    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get(META_RETRY_COUNT)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn convoy_id(&self) -> Option<&str> {
        self.metadata
            .get(META_CONVOY_ID)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn convoy_created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(META_CONVOY_CREATED_AT)
            .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert to the domain model.
    ///
    /// `default_branch` fills a missing target; `now` fills an unparseable
    /// creation time.
    pub fn to_merge_request(&self, default_branch: &str, now: DateTime<Utc>) -> MergeRequest {
        let target_branch = if self.target_branch.trim().is_empty() {
            default_branch.to_string()
        } else {
            self.target_branch.clone()
        };
        let close_reason = self
            .close_reason
            .as_deref()
            .and_then(CloseReason::parse_store_text);

        MergeRequest {
            id: self.id.clone(),
            branch: self.branch.clone(),
            target_branch,
            worker: self.worker.clone(),
            source_issue: self.source_issue.clone(),
            status: self.status,
            close_reason,
            created_at: self.created_at.unwrap_or(now),
            error: None,
        }
    }
}

/// Persistence port for merge-request records
///
/// The store is the source of truth for request state.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// List records in the open state, in no particular order
    async fn list_open_requests(&self) -> DomainResult<Vec<RequestRecord>>;

    /// Look up a record in any state by exact id or exact branch
    ///
    /// When several records share a branch, the newest wins.
    async fn get_request(&self, id_or_branch: &str) -> DomainResult<Option<RequestRecord>>;

    /// Close a record with the given reason text
    ///
    /// Closing an already closed record must not change it.
    async fn close(&self, id: &str, reason: &str) -> DomainResult<()>;

    /// Return a record to the open state after a failed attempt
    ///
    /// Stores that track retries bump `retry_count` here. Fails with `ClosedImmutable` when the record is closed.
    async fn reopen(&self, id: &str) -> DomainResult<()>;
}
