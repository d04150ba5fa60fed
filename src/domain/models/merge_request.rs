//! Merge request domain model.
//!
//! A merge request represents one worker's finished branch awaiting
//! integration into a shared target branch. The request store is the source
//! of truth; the state held here mirrors confirmed store operations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle status of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestStatus {
    /// Waiting in the queue
    Open,
    /// Handed to the merge engine
    InProgress,
    /// Terminal; see the close reason
    Closed,
}

impl MergeRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for MergeRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a merge request was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Merged,
    Rejected,
    Superseded,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }

    /// Parse a close reason from store text such as `"rejected: stale branch"`.
    ///
    /// Only the leading keyword is significant.
    pub fn parse_store_text(text: &str) -> Option<Self> {
        let keyword = text.split(':').next().unwrap_or_default().trim();
        match keyword.to_lowercase().as_str() {
            "merged" => Some(Self::Merged),
            "rejected" => Some(Self::Rejected),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }

    /// Text recorded in the request store when closing with this reason.
    pub fn store_text(&self, detail: Option<&str>) -> String {
        match detail.map(str::trim).filter(|d| !d.is_empty()) {
            Some(detail) => format!("{}: {detail}", self.as_str()),
            None => self.as_str().to_string(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a request goes after an integration attempt or a manual action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back to the queue for rework.
    Reopen,
    /// Terminal close with the given reason.
    Close(CloseReason),
}

/// A request to integrate a worker branch into a target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Store identifier.
    pub id: String,
    /// Source branch produced by the worker.
    pub branch: String,
    /// Branch the work is integrated into.
    pub target_branch: String,
    /// Name of the worker that produced the branch.
    pub worker: String,
    /// Work item the branch resolves.
    pub source_issue: String,
    pub status: MergeRequestStatus,
    pub close_reason: Option<CloseReason>,
    pub created_at: DateTime<Utc>,
    /// Last error reported for this request.
    pub error: Option<String>,
}

impl MergeRequest {
    /// Create a new open merge request.
    pub fn new(
        id: impl Into<String>,
        branch: impl Into<String>,
        target_branch: impl Into<String>,
        worker: impl Into<String>,
        source_issue: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            branch: branch.into(),
            target_branch: target_branch.into(),
            worker: worker.into(),
            source_issue: source_issue.into(),
            status: MergeRequestStatus::Open,
            close_reason: None,
            created_at: Utc::now(),
            error: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == MergeRequestStatus::Closed
    }

    pub fn is_open(&self) -> bool {
        self.status == MergeRequestStatus::Open
    }

    fn ensure_mutable(&self) -> DomainResult<()> {
        if self.is_closed() {
            return Err(DomainError::ClosedImmutable {
                id: self.id.clone(),
                reason: self.close_reason.unwrap_or(CloseReason::Merged),
            });
        }
        Ok(())
    }

    /// Mark the request as handed to the merge engine.
    pub fn start_processing(&mut self) -> DomainResult<()> {
        self.ensure_mutable()?;
        self.status = MergeRequestStatus::InProgress;
        Ok(())
    }

    /// Close the request with the given reason.
    pub fn close(&mut self, reason: CloseReason) -> DomainResult<()> {
        self.ensure_mutable()?;
        self.status = MergeRequestStatus::Closed;
        self.close_reason = Some(reason);
        Ok(())
    }

    /// Return the request to the queue.
    pub fn reopen(&mut self) -> DomainResult<()> {
        self.ensure_mutable()?;
        self.status = MergeRequestStatus::Open;
        Ok(())
    }

    /// Apply a disposition to the local state.
    pub fn apply(&mut self, disposition: Disposition) -> DomainResult<()> {
        match disposition {
            Disposition::Reopen => self.reopen(),
            Disposition::Close(reason) => self.close(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MergeRequest {
        MergeRequest::new("gt-abc", "polecat/nux", "main", "nux", "gt-123")
    }

    #[test]
    fn test_new_request_is_open() {
        let mr = sample();
        assert!(mr.is_open());
        assert!(mr.close_reason.is_none());
    }

    #[test]
    fn test_close_sets_reason() {
        let mut mr = sample();
        mr.close(CloseReason::Merged).unwrap();
        assert!(mr.is_closed());
        assert_eq!(mr.close_reason, Some(CloseReason::Merged));
    }

    #[test]
    fn test_closed_request_is_immutable() {
        let mut mr = sample();
        mr.close(CloseReason::Rejected).unwrap();

        let err = mr.close(CloseReason::Superseded).unwrap_err();
        assert!(err.is_closed_immutable());
        assert!(mr.reopen().unwrap_err().is_closed_immutable());
        assert!(mr.start_processing().unwrap_err().is_closed_immutable());
        assert_eq!(mr.close_reason, Some(CloseReason::Rejected));
    }

    #[test]
    fn test_apply_reopen_from_in_progress() {
        let mut mr = sample();
        mr.start_processing().unwrap();
        assert_eq!(mr.status, MergeRequestStatus::InProgress);

        mr.apply(Disposition::Reopen).unwrap();
        assert!(mr.is_open());
    }

    #[test]
    fn test_store_text_round_trip() {
        let text = CloseReason::Rejected.store_text(Some("stale"));
        assert_eq!(text, "rejected: stale");
        assert_eq!(CloseReason::parse_store_text(&text), Some(CloseReason::Rejected));
        assert_eq!(CloseReason::Merged.store_text(None), "merged");
        assert_eq!(CloseReason::Merged.store_text(Some("  ")), "merged");
        assert_eq!(CloseReason::parse_store_text("done"), None);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(MergeRequestStatus::from_str("OPEN"), Some(MergeRequestStatus::Open));
        assert_eq!(
            MergeRequestStatus::from_str("in-progress"),
            Some(MergeRequestStatus::InProgress)
        );
        assert_eq!(MergeRequestStatus::from_str("hooked"), None);
    }
}
