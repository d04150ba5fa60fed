//! Queue domain models: scoring inputs and ranked queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::merge_request::MergeRequest;

/// Inputs to the priority scorer for one pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInput {
    /// Explicit priority tier; lower is more urgent.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
    /// Number of previous integration attempts.
    pub retry_count: u32,
    /// Creation time of the parent convoy, when the request belongs to one.
    pub convoy_created_at: Option<DateTime<Utc>>,
}

impl ScoreInput {
    pub fn new(priority: u8, created_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            priority,
            created_at,
            now,
            retry_count: 0,
            convoy_created_at: None,
        }
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_convoy(mut self, convoy_created_at: DateTime<Utc>) -> Self {
        self.convoy_created_at = Some(convoy_created_at);
        self
    }
}

/// A ranked entry in the merge queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// 1-based rank; 1 is processed first.
    pub position: usize,
    pub mr: MergeRequest,
    /// Human-readable age, e.g. `"5m ago"`.
    pub age: String,
    pub score: f64,
}

/// Format the age of `since` relative to `now`.
pub fn format_age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);

    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
